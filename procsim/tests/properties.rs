use procsim::{Container, Environment, Error, Priority, Resource, Store};
use proptest::prelude::*;
use rstest::rstest;
use testing::Recorder;

#[rstest]
#[case(1, 0.0)]
#[case(2, 0.0)]
#[case(3, 5.0)]
fn test_capacity_limits_concurrent_users(#[case] capacity: usize, #[case] start: f64) {
    let env = Environment::with_initial_time(start);
    let resource = Resource::new(&env, capacity).unwrap();
    let recorder = Recorder::default();
    for _ in 0..6 {
        let env = env.clone();
        let resource = resource.clone();
        let recorder = recorder.clone();
        env.clone().process(async move {
            let request = resource.request();
            (&request).await?;
            recorder.record(resource.count());
            env.timeout(1.0)?.await?;
            Ok(())
        });
    }
    env.run().unwrap();
    let counts = recorder.take();
    assert_eq!(counts.len(), 6);
    assert!(counts.iter().all(|&count| count <= capacity));
    let batches = (6 + capacity - 1) / capacity;
    assert_eq!(env.now(), start + batches as f64);
}

#[rstest]
#[case(0.0, 0.0, Err(Error::InvalidCapacity))]
#[case(-1.0, 0.0, Err(Error::InvalidCapacity))]
#[case(f64::NAN, 0.0, Err(Error::InvalidCapacity))]
#[case(1.0, 2.0, Err(Error::InvalidInit(String::from("level (2) exceeds capacity (1)"))))]
#[case(1.0, 1.0, Ok(1.0))]
fn test_container_construction(
    #[case] capacity: f64,
    #[case] init: f64,
    #[case] expected: Result<f64, Error>,
) {
    let env = Environment::new();
    let level = Container::new(&env, capacity, init).map(|container| container.level());
    assert_eq!(level, expected);
}

#[rstest]
#[case(0, true)]
#[case(1, false)]
#[case(4, false)]
fn test_store_capacity(#[case] capacity: usize, #[case] fails: bool) {
    let env = Environment::new();
    assert_eq!(Store::<()>::new(&env, capacity).is_err(), fails);
}

proptest! {
    #[test]
    fn test_timeout_fires_after_delay(start in 0.0..1e6_f64, delay in 0.0..1e6_f64) {
        let env = Environment::with_initial_time(start);
        let timeout = env.timeout_with(delay, delay)?;
        prop_assert_eq!(env.run_until_event(&timeout)?, delay);
        prop_assert_eq!(env.now(), start + delay);
    }

    #[test]
    fn test_same_time_events_keep_scheduling_order(
        delays in prop::collection::vec(0_u8..4, 1..50),
    ) {
        let env = Environment::new();
        let recorder = Recorder::default();
        for (index, &delay) in delays.iter().enumerate() {
            let event = env.timeout_with(f64::from(delay), index)?;
            let recorder = recorder.clone();
            event.add_callback(move |env, _| recorder.record((env.now(), index)))?;
        }
        env.run()?;
        let mut expected: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(index, &delay)| (f64::from(delay), index))
            .collect();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        prop_assert_eq!(recorder.take(), expected);
    }

    #[test]
    fn test_urgent_events_go_first(normal in 1_usize..20, urgent in 1_usize..20) {
        let env = Environment::new();
        let recorder = Recorder::default();
        for (count, priority) in [(normal, Priority::Normal), (urgent, Priority::Urgent)] {
            for _ in 0..count {
                let event = env.event::<()>();
                event.succeed(())?;
                env.schedule(&event, priority, 1.0)?;
                let recorder = recorder.clone();
                event.add_callback(move |_, _| recorder.record(priority))?;
            }
        }
        env.run()?;
        let order = recorder.take();
        prop_assert_eq!(order.len(), normal + urgent);
        prop_assert!(order[..urgent].iter().all(|&p| p == Priority::Urgent));
        prop_assert!(order[urgent..].iter().all(|&p| p == Priority::Normal));
    }
}
