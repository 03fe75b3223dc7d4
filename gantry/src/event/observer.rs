use crate::event::subscription::EventDecodeError;

/// Receives push-delivered events from an
/// [`EventSubscription`](crate::EventSubscription).
///
/// The delivery contract is sequential: for one observer, calls never
/// overlap. A decode failure is delivered through
/// [`on_error`](EventObserver::on_error) and terminates the delivery; a
/// cleanly closed or disposed subscription terminates it through
/// [`on_completed`](EventObserver::on_completed).
pub trait EventObserver<T>: Send + Sync {
    /// Delivers one decoded event.
    fn on_next(&self, event: T);

    /// Delivers a terminal decoding failure.
    fn on_error(&self, error: EventDecodeError);

    /// Signals that no further events will be delivered.
    fn on_completed(&self);
}
