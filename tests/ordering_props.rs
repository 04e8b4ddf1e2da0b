#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use proptest::prelude::*;
    use promised::{all, defer, first, seq, Deferred, Error, Step, Thenable, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn settle_order(len: usize) -> impl Strategy<Value = Vec<usize>> {
        Just((0..len).collect::<Vec<_>>()).prop_shuffle()
    }

    proptest! {
        #[test]
        fn all_orders_by_input_not_settlement(order in (1usize..12).prop_flat_map(settle_order)) {
            let members: Vec<Deferred> = order.iter().map(|_| defer()).collect();
            let combined = all(members.iter().map(|d| Value::from(d.promise())));
            for &index in &order {
                prop_assert!(!combined.is_settled());
                members[index].resolve(Value::from(index as u32)).unwrap();
            }
            let expected: Vec<Value> = (0..order.len()).map(|i| Value::from(i as u32)).collect();
            prop_assert_eq!(block_on(combined), Ok(Value::List(expected)));
        }

        #[test]
        fn first_reports_the_earliest_settlement(order in (1usize..8).prop_flat_map(settle_order)) {
            let members: Vec<Deferred> = order.iter().map(|_| defer()).collect();
            let winner = first(members.iter().map(|d| Value::from(d.promise())));
            for &index in &order {
                members[index].resolve(Value::from(index as u32)).unwrap();
            }
            prop_assert_eq!(block_on(winner), Ok(Value::from(order[0] as u32)));
        }

        #[test]
        fn seq_of_increments_adds_up(start in -1000i32..1000, steps in 0usize..20) {
            let increments = (0..steps).map(|_| -> Step {
                Box::new(|v| Ok(Value::Number(v.as_number().unwrap_or_default() + 1.0)))
            });
            let total = seq(increments, start);
            prop_assert_eq!(block_on(total), Ok(Value::from(start + steps as i32)));
        }

        #[test]
        fn listeners_fire_in_registration_order(count in 1usize..16, fail in any::<bool>()) {
            let deferred = defer();
            let log = Rc::new(RefCell::new(Vec::new()));
            let promise = deferred.promise();
            for i in 0..count {
                let on_value = log.clone();
                let on_error = log.clone();
                promise.then(
                    Some(Box::new(move |v| {
                        on_value.borrow_mut().push(i);
                        Ok(v)
                    })),
                    Some(Box::new(move |_| {
                        on_error.borrow_mut().push(i);
                        Ok(Value::Undefined)
                    })),
                    None,
                );
            }
            if fail {
                deferred.reject(Error::msg("rejected")).unwrap();
            } else {
                deferred.resolve(Value::Null).unwrap();
            }
            prop_assert_eq!(log.borrow().clone(), (0..count).collect::<Vec<_>>());
        }
    }
}
