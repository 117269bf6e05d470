use tokio::time::Instant;

/// Clock is the replica's only source of time, so tests can drive elections with a mock.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}
