//! Unit tests for the event module

#[cfg(test)]
mod tests {
    use crate::event::{Dispatcher, Event, EventBus, PlayerId};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_send_receive() {
        let bus = EventBus::new(10);
        let mut subscriber = bus.subscribe();

        bus.send(Event::StartPlaying(PlayerId(1)));

        assert_eq!(subscriber.try_recv(), Ok(Event::StartPlaying(PlayerId(1))));
        assert!(matches!(subscriber.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_event_bus_send_without_subscribers() {
        let bus = EventBus::default();

        // Should not panic
        bus.send(Event::Loop(PlayerId(1)));

        let mut subscriber = bus.subscribe();
        assert!(subscriber.drain().is_empty());
    }

    #[test]
    fn test_event_player() {
        assert_eq!(Event::FinishPlaying(PlayerId(3)).player(), PlayerId(3));
        assert_eq!(
            Event::SessionFailed {
                player: PlayerId(4),
                error: "device lost".to_string()
            }
            .player(),
            PlayerId(4)
        );
    }

    #[test]
    fn test_posted_events_wait_for_tick() {
        let mut dispatcher = Dispatcher::new(10);
        let mut subscriber = dispatcher.subscribe();
        let queue = dispatcher.queue();

        queue.post(Event::StartPlaying(PlayerId(1)));
        queue.post(Event::Loop(PlayerId(1)));

        // Nothing is delivered until the host ticks
        assert!(subscriber.drain().is_empty());

        assert_eq!(dispatcher.tick(), 2);
        assert_eq!(
            subscriber.drain(),
            vec![Event::StartPlaying(PlayerId(1)), Event::Loop(PlayerId(1))]
        );

        // Each event is delivered once
        assert_eq!(dispatcher.tick(), 0);
        assert!(subscriber.drain().is_empty());
    }

    #[test]
    fn test_events_keep_posting_order_across_queues() {
        let mut dispatcher = Dispatcher::default();
        let mut subscriber = dispatcher.subscribe();
        let first = dispatcher.queue();
        let second = first.clone();

        first.post(Event::StartPlaying(PlayerId(1)));
        second.post(Event::StartPlaying(PlayerId(2)));
        first.post(Event::StopPlaying(PlayerId(1)));

        dispatcher.tick();

        let players: Vec<_> = subscriber.drain().iter().map(Event::player).collect();
        assert_eq!(players, vec![PlayerId(1), PlayerId(2), PlayerId(1)]);
    }

    #[test]
    fn test_every_subscriber_gets_each_event() {
        let mut dispatcher = Dispatcher::new(10);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.bus().subscribe();

        dispatcher.queue().post(Event::FinishPlaying(PlayerId(7)));
        dispatcher.tick();

        assert_eq!(a.drain(), vec![Event::FinishPlaying(PlayerId(7))]);
        assert_eq!(b.drain(), vec![Event::FinishPlaying(PlayerId(7))]);
    }

    #[test]
    fn test_post_after_dispatcher_dropped() {
        let dispatcher = Dispatcher::new(10);
        let queue = dispatcher.queue();
        drop(dispatcher);

        // Should not panic
        queue.post(Event::StopPlaying(PlayerId(1)));
    }

    #[tokio::test]
    async fn test_dispatcher_run_delivers_in_background() {
        let dispatcher = Dispatcher::new(10);
        let mut subscriber = dispatcher.subscribe();
        let queue = dispatcher.queue();
        let handle = dispatcher.run(Duration::from_millis(5));

        queue.post(Event::Loop(PlayerId(9)));

        let event = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
            .await
            .expect("dispatcher should tick");
        assert_eq!(event, Some(Event::Loop(PlayerId(9))));

        handle.abort();
    }
}
