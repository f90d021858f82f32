//! Outbound notification queue.
//!
//! Every component publishes frames through a [`Notifier`]; publishing
//! enqueues and returns immediately. The notify loop drains the queue in
//! batches and coalesces adjacent status-snapshot frames, so an aggregate
//! that changed in several ways in one tick reaches the phone as a single
//! merged success frame.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use syncsonic_core::{Frame, Opcode};

/// Queue depth. Frames beyond this are dropped with a warning rather than
/// blocking the publisher.
const QUEUE_CAPACITY: usize = 256;

/// Handle for enqueueing outbound frames.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Frame>,
}

impl Notifier {
    /// Create the queue. The receiver side belongs to the notify loop.
    pub fn new() -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Enqueue a frame for delivery. Never blocks.
    pub fn publish(&self, frame: Frame) {
        if let Err(e) = self.tx.try_send(frame) {
            warn!("Dropping outbound frame: {}", e);
        }
    }
}

/// Merge adjacent success frames in a drained batch.
///
/// Later fields win on key collision, matching last-write-wins settings
/// semantics. Non-success frames pass through untouched and act as merge
/// barriers so phase ordering is preserved.
pub fn coalesce(batch: Vec<Frame>) -> Vec<Frame> {
    let mut out: Vec<Frame> = Vec::with_capacity(batch.len());
    for frame in batch {
        if frame.opcode == Opcode::Success {
            if let Some(last) = out.last_mut() {
                if last.opcode == Opcode::Success {
                    merge_objects(&mut last.payload, frame.payload);
                    continue;
                }
            }
        }
        out.push(frame);
    }
    out
}

fn merge_objects(base: &mut Value, incoming: Value) {
    match (base.as_object_mut(), incoming) {
        (Some(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                base_map.insert(key, value);
            }
        }
        // Non-object payloads on a success frame (e.g. the paired-device
        // map) are rare; the newer frame simply replaces the older one.
        (_, incoming) => *base = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adjacent_success_frames_merge_into_one() {
        let batch = vec![
            Frame::success(json!({"scanning": true})),
            Frame::success(json!({"connected": ["AA:BB:CC:DD:EE:01"]})),
        ];
        let merged = coalesce(batch);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].payload["scanning"], true);
        assert_eq!(
            merged[0].payload["connected"],
            json!(["AA:BB:CC:DD:EE:01"])
        );
    }

    #[test]
    fn later_fields_win_on_collision() {
        let batch = vec![
            Frame::success(json!({"scanning": true})),
            Frame::success(json!({"scanning": false})),
        ];
        let merged = coalesce(batch);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].payload["scanning"], false);
    }

    #[test]
    fn phase_frames_are_merge_barriers() {
        let batch = vec![
            Frame::success(json!({"scanning": true})),
            Frame::new(Opcode::ConnectionStatus, json!({"phase": "fsm_start"})),
            Frame::success(json!({"connected": []})),
        ];
        let merged = coalesce(batch);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].opcode, Opcode::ConnectionStatus);
    }

    #[test]
    fn non_success_frames_pass_through() {
        let batch = vec![
            Frame::failure("busy"),
            Frame::new(Opcode::Error, json!({"phase": "no_adapter"})),
        ];
        assert_eq!(coalesce(batch).len(), 2);
    }

    #[tokio::test]
    async fn publish_enqueues_without_blocking() {
        let (notifier, mut rx) = Notifier::new();
        notifier.publish(Frame::success(json!({})));
        notifier.publish(Frame::failure("busy"));
        assert_eq!(rx.recv().await.unwrap().opcode, Opcode::Success);
        assert_eq!(rx.recv().await.unwrap().opcode, Opcode::Failure);
    }
}
