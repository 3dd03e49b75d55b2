//! High-level client API over an interposed connection.
//!
//! Convenience constructors for the common message shapes; every call goes
//! through [`Interposer::send`], so the outbound channel sees all of it.

use tracing::debug;

use tapwire_protocol::{
    now_ms, Delivery, Envelope, MessageKind, Quat, RpcTarget, Value, ValueMap, Vec3,
};

use crate::interposer::{InterposeError, Interposer, SendOutcome};
use crate::traits::Transport;

/// Options for an outgoing RPC.
#[derive(Debug, Clone, Copy)]
pub struct RpcOptions {
    pub target: RpcTarget,
    pub delivery: Delivery,
    pub object_id: Option<i64>,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            target: RpcTarget::Others,
            delivery: Delivery::Reliable,
            object_id: None,
        }
    }
}

/// Legacy event receiver groups, mapped onto [`RpcTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverGroup {
    #[default]
    Others,
    All,
    Server,
}

/// A client for one interposed connection.
pub struct Client<T: Transport> {
    interposer: Interposer<T>,
}

impl<T: Transport> Client<T> {
    #[must_use]
    pub fn new(interposer: Interposer<T>) -> Self {
        Self { interposer }
    }

    #[must_use]
    pub fn interposer(&self) -> &Interposer<T> {
        &self.interposer
    }

    fn send_message(
        &self,
        kind: MessageKind,
        data: ValueMap,
    ) -> Result<SendOutcome, InterposeError> {
        self.interposer.send(Envelope::new(kind, Value::Map(data)))
    }

    /// Send an RPC by method name.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn send_rpc(
        &self,
        method_name: &str,
        parameters: ValueMap,
        options: RpcOptions,
    ) -> Result<SendOutcome, InterposeError> {
        let kind = match options.delivery {
            Delivery::Unreliable => MessageKind::RpcUnreliable,
            Delivery::Reliable | Delivery::ReliableOrdered => MessageKind::RpcReliable,
        };
        let sender_id = self
            .interposer
            .session()
            .client_id()
            .unwrap_or(-1);

        let mut data = ValueMap::new();
        data.insert("methodName", method_name);
        data.insert("parameters", Value::Map(parameters));
        data.insert("senderId", Value::Int64(sender_id));
        data.insert("target", Value::integer(i64::from(options.target as u8)));
        if let Some(object_id) = options.object_id {
            data.insert("objectId", Value::Int64(object_id));
        }

        debug!(method_name, "Sending RPC");
        self.send_message(kind, data)
    }

    /// Raise an event by numeric code, the legacy convention. The code maps
    /// to the `Event_<code>` method name, so legacy callers and named-RPC
    /// callers dispatch identically.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn raise_event(
        &self,
        event_code: i64,
        content: ValueMap,
        receivers: ReceiverGroup,
        reliable: bool,
    ) -> Result<SendOutcome, InterposeError> {
        let target = match receivers {
            ReceiverGroup::All => RpcTarget::All,
            ReceiverGroup::Server => RpcTarget::Server,
            ReceiverGroup::Others => RpcTarget::Others,
        };
        let delivery = if reliable {
            Delivery::Reliable
        } else {
            Delivery::Unreliable
        };
        self.send_rpc(
            &format!("Event_{event_code}"),
            content,
            RpcOptions {
                target,
                delivery,
                object_id: None,
            },
        )
    }

    /// Update one replicated variable on an object.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn update_sync_var(
        &self,
        object_id: i64,
        var_name: &str,
        value: Value,
    ) -> Result<SendOutcome, InterposeError> {
        let mut data = ValueMap::new();
        data.insert("objectId", Value::Int64(object_id));
        data.insert("varName", var_name);
        data.insert("value", value);
        self.send_message(MessageKind::SyncVar, data)
    }

    /// Send a transform update for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn sync_transform(
        &self,
        object_id: i64,
        position: Vec3,
        rotation: Quat,
        velocity: Option<Vec3>,
    ) -> Result<SendOutcome, InterposeError> {
        let mut data = ValueMap::new();
        data.insert("objectId", Value::Int64(object_id));
        data.insert("position", Value::Vec3(position));
        data.insert("rotation", Value::Quat(rotation));
        if let Some(velocity) = velocity {
            data.insert("velocity", Value::Vec3(velocity));
        }
        self.send_message(MessageKind::TransformSync, data)
    }

    /// Request an ownership change on an object.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn transfer_ownership(
        &self,
        object_id: i64,
        new_owner_id: i64,
    ) -> Result<SendOutcome, InterposeError> {
        let mut data = ValueMap::new();
        data.insert("objectId", Value::Int64(object_id));
        data.insert("newOwnerId", Value::Int64(new_owner_id));
        self.send_message(MessageKind::ChangeOwnership, data)
    }

    /// Send a ping carrying the current timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn ping(&self) -> Result<SendOutcome, InterposeError> {
        let mut data = ValueMap::new();
        data.insert("timestamp", Value::Int64(now_ms()));
        self.send_message(MessageKind::Ping, data)
    }

    /// Send authentication data.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn authenticate(&self, auth_data: ValueMap) -> Result<SendOutcome, InterposeError> {
        self.send_message(MessageKind::Authenticate, auth_data)
    }

    /// Send the initial connection request with protocol and client
    /// version defaults, overridable through `connection_data`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails.
    pub fn connection_request(
        &self,
        connection_data: ValueMap,
    ) -> Result<SendOutcome, InterposeError> {
        let mut data = ValueMap::new();
        data.insert("protocolVersion", "1.0");
        data.insert("clientVersion", "1.0.0");
        for (key, value) in connection_data.iter() {
            data.insert(key, value.clone());
        }
        self.send_message(MessageKind::ConnectionRequest, data)
    }

    /// Announce a clean disconnect and reset the session.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails; the
    /// session is reset either way.
    pub fn disconnect(&self) -> Result<SendOutcome, InterposeError> {
        let mut data = ValueMap::new();
        data.insert("reason", "Client disconnect");
        let result = self.send_message(MessageKind::Disconnect, data);
        self.interposer.on_close();
        result
    }
}
