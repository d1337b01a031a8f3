// Lock-free communication channels

use crate::messaging::event::PlaybackEvent;
use crate::messaging::notification::Notification;
use ringbuf::{HeapRb, traits::Split};

pub type EventProducer = ringbuf::HeapProd<PlaybackEvent>;
pub type EventConsumer = ringbuf::HeapCons<PlaybackEvent>;

pub fn create_event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let rb = HeapRb::<PlaybackEvent>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

/// Audio clock position reports (seconds), written by the audio callback
pub type PositionProducer = ringbuf::HeapProd<f64>;
pub type PositionConsumer = ringbuf::HeapCons<f64>;

pub fn create_position_channel(capacity: usize) -> (PositionProducer, PositionConsumer) {
    let rb = HeapRb::<f64>::new(capacity);
    rb.split()
}
