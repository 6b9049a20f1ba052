//! In-process doubles for driving a session without a network.
//!
//! [`ScriptedChannel`] plays back a queue of inbound events and records what
//! the session sends.  The paired [`ScriptHandle`] stays with the test to
//! feed the queue and inspect the traffic after the channel has been moved
//! into a [`SessionConnection`](crate::session::SessionConnection).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{json, Value};

use crate::error::TransportError;
use crate::protocol::{events, Frame};
use crate::session::{Channel, ChannelEvent};

#[derive(Debug)]
enum OpenStep {
    Finish(Result<(), TransportError>),
    /// Never resolves.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    open_steps: VecDeque<OpenStep>,
    /// Outbound event names the transport refuses.
    refused_sends: Vec<String>,
    inbound: VecDeque<ChannelEvent>,
    sent: Vec<Frame>,
    opened: Vec<String>,
    closes: u32,
    is_open: bool,
    /// Park `recv` on an empty queue instead of reporting `Closed`.
    hold_when_empty: bool,
    /// Payload queued as `authSuccess` every time an auth frame goes out.
    auth_reply: Option<Value>,
}

/// Scripted [`Channel`] implementation.
#[derive(Debug)]
pub struct ScriptedChannel {
    script: Rc<RefCell<Script>>,
}

/// Test-side handle onto a [`ScriptedChannel`].
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    script: Rc<RefCell<Script>>,
}

impl ScriptedChannel {
    pub fn new() -> (Self, ScriptHandle) {
        let script = Rc::new(RefCell::new(Script::default()));
        (
            Self {
                script: script.clone(),
            },
            ScriptHandle { script },
        )
    }
}

impl ScriptHandle {
    /// Result for the next `open`; unscripted opens succeed.
    pub fn push_open_result(&self, result: Result<(), TransportError>) -> &Self {
        self.script
            .borrow_mut()
            .open_steps
            .push_back(OpenStep::Finish(result));
        self
    }

    /// Make the next `open` hang until the caller gives up on it.
    pub fn hang_next_open(&self) -> &Self {
        self.script.borrow_mut().open_steps.push_back(OpenStep::Hang);
        self
    }

    /// Fail every send of `event` with a transport error.
    pub fn refuse_sends(&self, event: &str) -> &Self {
        self.script.borrow_mut().refused_sends.push(event.to_string());
        self
    }

    pub fn fail_next_open(&self, reason: &str) -> &Self {
        self.push_open_result(Err(TransportError::Unreachable(reason.to_string())))
    }

    pub fn push_frame(&self, event: &str, payload: Value) -> &Self {
        self.script
            .borrow_mut()
            .inbound
            .push_back(ChannelEvent::Frame(Frame::new(event, payload)));
        self
    }

    pub fn push_close(&self, reason: &str) -> &Self {
        self.script.borrow_mut().inbound.push_back(ChannelEvent::Closed {
            reason: reason.to_string(),
        });
        self
    }

    pub fn hold_when_empty(&self, hold: bool) -> &Self {
        self.script.borrow_mut().hold_when_empty = hold;
        self
    }

    /// Answer every auth frame with `authSuccess` carrying these values.
    pub fn accept_auth(&self, player_id: &str, display_name: &str, x: i32, y: i32) -> &Self {
        self.script.borrow_mut().auth_reply = Some(json!({
            "playerId": player_id,
            "displayName": display_name,
            "position": { "x": x, "y": y },
        }));
        self
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.script.borrow().sent.clone()
    }

    /// Event names of everything sent so far, in order.
    pub fn sent_events(&self) -> Vec<String> {
        self.script
            .borrow()
            .sent
            .iter()
            .map(|f| f.event.clone())
            .collect()
    }

    pub fn sent_count(&self, event: &str) -> usize {
        self.script
            .borrow()
            .sent
            .iter()
            .filter(|f| f.event == event)
            .count()
    }

    /// Addresses passed to `open`, in order.
    pub fn opened(&self) -> Vec<String> {
        self.script.borrow().opened.clone()
    }

    pub fn close_calls(&self) -> u32 {
        self.script.borrow().closes
    }

    pub fn is_open(&self) -> bool {
        self.script.borrow().is_open
    }

    pub fn pending_inbound(&self) -> usize {
        self.script.borrow().inbound.len()
    }
}

impl Channel for ScriptedChannel {
    async fn open(&mut self, address: &str) -> Result<(), TransportError> {
        let step = {
            let mut script = self.script.borrow_mut();
            script.opened.push(address.to_string());
            script
                .open_steps
                .pop_front()
                .unwrap_or(OpenStep::Finish(Ok(())))
        };

        match step {
            OpenStep::Hang => std::future::pending().await,
            OpenStep::Finish(result) => {
                self.script.borrow_mut().is_open = result.is_ok();
                result
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let mut script = self.script.borrow_mut();
        if !script.is_open {
            return Err(TransportError::Send("channel is not open".into()));
        }
        if script.refused_sends.contains(&frame.event) {
            return Err(TransportError::Send(format!("'{}' refused", frame.event)));
        }
        if frame.event == events::AUTH {
            if let Some(reply) = script.auth_reply.clone() {
                script
                    .inbound
                    .push_back(ChannelEvent::Frame(Frame::new(events::AUTH_SUCCESS, reply)));
            }
        }
        script.sent.push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> ChannelEvent {
        let hold = {
            let mut script = self.script.borrow_mut();
            if let Some(event) = script.inbound.pop_front() {
                if matches!(event, ChannelEvent::Closed { .. }) {
                    script.is_open = false;
                }
                return event;
            }
            script.hold_when_empty
        };

        if hold {
            std::future::pending::<ChannelEvent>().await
        } else {
            self.script.borrow_mut().is_open = false;
            ChannelEvent::Closed {
                reason: "script exhausted".into(),
            }
        }
    }

    async fn close(&mut self) {
        let mut script = self.script.borrow_mut();
        script.closes += 1;
        script.is_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frames_trigger_scripted_reply() {
        let (mut channel, script) = ScriptedChannel::new();
        script.accept_auth("p1", "Ada", 1, 2);

        tokio_test::block_on(async {
            channel.open("ws://w").await.unwrap();
            channel
                .send(Frame::new(events::AUTH, json!({"token": "t"})))
                .await
                .unwrap();

            match channel.recv().await {
                ChannelEvent::Frame(frame) => {
                    assert_eq!(frame.event, events::AUTH_SUCCESS);
                    assert_eq!(frame.payload["playerId"], "p1");
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(matches!(channel.recv().await, ChannelEvent::Closed { .. }));
        });
        assert_eq!(script.sent_events(), vec!["auth"]);
        assert!(!script.is_open());
    }

    #[test]
    fn send_requires_open_channel() {
        let (mut channel, script) = ScriptedChannel::new();
        script.fail_next_open("refused");

        tokio_test::block_on(async {
            assert!(channel.open("ws://w").await.is_err());
            assert!(channel.send(Frame::new("move", json!({}))).await.is_err());
        });
        assert!(script.sent().is_empty());
        assert_eq!(script.opened(), vec!["ws://w"]);
    }
}
