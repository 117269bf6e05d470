use crate::actor::WeakActorClient;
use crate::replica::{Clock, RealClock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Ticker drives the replica's clock-dependent work by sending it a `Tick` at a fixed cadence.
/// It exits once the replica is gone.
pub(crate) struct Ticker<C: Clock = RealClock> {
    tick_interval: Duration,
    actor_client: WeakActorClient,
    clock: C,
}

impl Ticker {
    pub(crate) fn spawn(tick_interval: Duration, actor_client: WeakActorClient) -> JoinHandle<()> {
        let ticker = Ticker::new(tick_interval, actor_client, RealClock);
        tokio::task::spawn(ticker.run())
    }
}

impl<C: Clock + 'static> Ticker<C> {
    fn new(tick_interval: Duration, actor_client: WeakActorClient, clock: C) -> Self {
        Ticker {
            tick_interval,
            actor_client,
            clock,
        }
    }

    async fn run(mut self) {
        let mut next_tick = self.clock.now() + self.tick_interval;
        loop {
            self.clock.sleep_until(next_tick).await;
            if self.actor_client.tick().await.is_err() {
                return;
            }

            next_tick = self.next_tick_after(next_tick);
        }
    }

    // Ticks missed while the replica was busy are skipped, not replayed in a burst.
    fn next_tick_after(&self, previous_tick: Instant) -> Instant {
        let next_tick = previous_tick + self.tick_interval;
        let now = self.clock.now();
        if next_tick <= now {
            now + self.tick_interval
        } else {
            next_tick
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::ticker::test_utils::{mocked_clock, TestUtilActor};

    #[tokio::test]
    async fn ticks_at_fixed_cadence() {
        // -- setup --
        let tick_interval = Duration::from_millis(100);
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut controller) = mocked_clock();

        let ticker = Ticker::new(tick_interval, actor_client.weak(), mock_clock);
        let task = tokio::task::spawn(ticker.run());

        // -- execute & verify --

        // 1. Half a tick in, nothing yet.
        controller.advance(tick_interval / 2);
        actor.assert_no_event().await;

        // 2. One tick per interval.
        for _ in 0..5 {
            controller.advance(tick_interval);
            actor.assert_tick_event().await;
            actor.assert_no_event().await;
        }

        // 3. A big leap yields a single tick, and the cadence restarts from there.
        controller.advance(tick_interval * 5);
        actor.assert_tick_event().await;
        actor.assert_no_event().await;

        controller.advance(tick_interval / 2);
        actor.assert_no_event().await;
        controller.advance(tick_interval / 2);
        actor.assert_tick_event().await;

        // 4. Ticker exits once the replica is gone.
        drop(actor_client);
        controller.advance(tick_interval);
        task.await.unwrap();
        actor.assert_closed().await;

        assert_eq!(controller.elapsed_time(), tick_interval * 25 / 2);
    }
}
