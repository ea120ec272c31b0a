use procsim::{Environment, Error, PreemptiveResource};
use testing::logger;

#[test]
fn test_kernel_logs() -> anyhow::Result<()> {
    logger::capture(log::LevelFilter::Debug)?;
    logger::drain()?;

    let env = Environment::new();
    let resource = PreemptiveResource::new(&env, 1)?;
    let _held = resource.request(5, false);
    let _urgent = resource.request(0, true);
    let failing = env.process(async { Err::<(), _>(Error::failed("oops")) });
    assert_eq!(env.run(), Err(Error::failed("oops")));
    assert_eq!(failing.id().to_string(), "event#2");

    let logs = logger::drain()?;
    assert!(logs
        .iter()
        .any(|line| line == "[DEBUG] [0] Request event#1 preempts event#0"));
    assert!(logs
        .iter()
        .any(|line| line == "[DEBUG] [0] process#0 failed: oops"));
    assert!(logs
        .iter()
        .any(|line| line == "[DEBUG] Unhandled failure of event#2: oops"));
    assert!(logs.iter().all(|line| !line.starts_with("[TRACE]")));
    Ok(())
}
