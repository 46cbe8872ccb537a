//! Orders: serializable player intents.
//!
//! An [`Order`] is produced once per player action (usually by a trait's
//! issue-order capability), travels through the lockstep pipeline as part of
//! an [`OrderPacket`], and is consumed during the frame it was scheduled for.
//! Orders are matched to behaviour purely by `order_string`; receivers ignore
//! strings they do not recognise.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::connection::ClientId;
use crate::error::Result;
use crate::math::CPos;

/// Order string for chat messages.
pub const CHAT: &str = "Chat";
/// Order string for pausing and unpausing.
pub const PAUSE_GAME: &str = "PauseGame";
/// Longest chat message kept, in characters.
pub const MAX_CHAT_LENGTH: usize = 2500;

/// A player's intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Command name matched by resolvers.
    pub order_string: String,
    /// Actor the order is addressed to.
    pub subject: Option<ActorId>,
    /// Target actor.
    pub target_actor: Option<ActorId>,
    /// Target cell.
    pub target_location: Option<CPos>,
    /// Free-form target, e.g. chat text or an actor type name.
    pub target_string: Option<String>,
    /// Free-form integer payload.
    pub extra_data: Option<u32>,
    /// Append to the subject's current activity instead of replacing it.
    pub queued: bool,
    /// Bypass the frame buffer and apply on arrival.
    pub is_immediate: bool,
}

impl Order {
    /// Create an order addressed to `subject`.
    #[must_use]
    pub fn new(order_string: impl Into<String>, subject: Option<ActorId>) -> Self {
        Self {
            order_string: order_string.into(),
            subject,
            target_actor: None,
            target_location: None,
            target_string: None,
            extra_data: None,
            queued: false,
            is_immediate: false,
        }
    }

    /// An order that only carries a string payload.
    #[must_use]
    pub fn from_target_string(
        order_string: impl Into<String>,
        target_string: impl Into<String>,
        is_immediate: bool,
    ) -> Self {
        Self {
            target_string: Some(target_string.into()),
            is_immediate,
            ..Self::new(order_string, None)
        }
    }

    /// An immediate chat message.
    #[must_use]
    pub fn chat(text: impl Into<String>) -> Self {
        Self::from_target_string(CHAT, text, true)
    }

    /// An immediate pause toggle.
    #[must_use]
    pub fn pause_game(paused: bool) -> Self {
        Self::from_target_string(PAUSE_GAME, if paused { "Pause" } else { "UnPause" }, true)
    }

    /// Set the target actor.
    #[must_use]
    pub fn with_target_actor(mut self, target: ActorId) -> Self {
        self.target_actor = Some(target);
        self
    }

    /// Set the target cell.
    #[must_use]
    pub fn with_target_location(mut self, cell: CPos) -> Self {
        self.target_location = Some(cell);
        self
    }

    /// Set the string payload.
    #[must_use]
    pub fn with_target_string(mut self, target: impl Into<String>) -> Self {
        self.target_string = Some(target.into());
        self
    }

    /// Set the integer payload.
    #[must_use]
    pub fn with_extra_data(mut self, data: u32) -> Self {
        self.extra_data = Some(data);
        self
    }

    /// Set the queued flag.
    #[must_use]
    pub fn queued(mut self, queued: bool) -> Self {
        self.queued = queued;
        self
    }

    /// Whether this is a pause toggle requesting a pause.
    #[must_use]
    pub fn is_pause_request(&self) -> bool {
        self.order_string == PAUSE_GAME && self.target_string.as_deref() == Some("Pause")
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.order_string)?;
        if let Some(subject) = self.subject {
            write!(f, " {subject}")?;
        }
        if let Some(target) = self.target_actor {
            write!(f, " -> {target}")?;
        }
        if let Some(cell) = self.target_location {
            write!(f, " @ {cell}")?;
        }
        if let Some(target) = &self.target_string {
            write!(f, " {target:?}")?;
        }
        if self.queued {
            f.write_str(" (queued)")?;
        }
        Ok(())
    }
}

/// The orders one client contributes to one frame.
///
/// An empty packet is meaningful: it tells peers that the client issued
/// nothing for that frame, which is what lets the lockstep barrier open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderPacket {
    /// Orders in issue order.
    pub orders: Vec<Order>,
}

impl OrderPacket {
    /// Wrap a list of orders.
    #[must_use]
    pub const fn new(orders: Vec<Order>) -> Self {
        Self { orders }
    }

    /// A packet with no orders.
    #[must_use]
    pub const fn empty() -> Self {
        Self { orders: Vec::new() }
    }

    /// Whether the packet carries no orders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Encode to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// An order tagged with the client that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOrder {
    /// Issuing client.
    pub client: ClientId,
    /// The order.
    pub order: Order,
}

/// Mouse button that produced an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MouseButton {
    /// Primary button (select).
    #[default]
    Left,
    /// Secondary button (command).
    Right,
}

/// Modifier keys held during an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    /// Shift (queue).
    pub shift: bool,
    /// Control (force-fire).
    pub ctrl: bool,
    /// Alt (force-move).
    pub alt: bool,
}

/// Player input that traits turn into orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MouseInput {
    /// Button pressed.
    pub button: MouseButton,
    /// Modifiers held.
    pub modifiers: Modifiers,
}

impl MouseInput {
    /// A plain right-click.
    #[must_use]
    pub const fn right_click() -> Self {
        Self {
            button: MouseButton::Right,
            modifiers: Modifiers {
                shift: false,
                ctrl: false,
                alt: false,
            },
        }
    }

    /// The same input with shift held.
    #[must_use]
    pub const fn with_shift(mut self) -> Self {
        self.modifiers.shift = true;
        self
    }
}
