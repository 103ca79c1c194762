//! The name service.
//!
//! A well-known endpoint on address [`NS_ADDR`] over which the two sides
//! announce and revoke named services. The remote sends 40-byte packed
//! announcements; a create announcement materializes a channel with the
//! announced name and destination, a destroy announcement removes it.
//!
//! The host side is implemented as a built-in driver bound to the channel
//! the transport creates at attach. Its probe tells the remote name
//! service the host is up, so the remote can start publishing.

use std::sync::Arc;

use remsg_core::{Error, NsMessage, ADDR_ANY, NS_ADDR};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::registry::Driver;

/// Name of the channel carrying name-service traffic.
pub const NS_NAME: &str = "name-service";

/// Sent to the remote name service once the host side is listening.
const NS_UP: &[u8] = b"UP!";

pub(crate) struct NsDriver;

impl Driver for NsDriver {
    fn id_table(&self) -> &[&str] {
        &[NS_NAME]
    }

    fn probe(&self, channel: &Arc<Channel>) -> Result<(), Error> {
        info!(src = channel.src(), dst = channel.dst(), "name service up");
        channel.send(NS_UP)
    }

    fn remove(&self, _channel: &Arc<Channel>) {
        info!("name service down");
    }

    fn callback(&self, channel: &Arc<Channel>, payload: &[u8], _src: u32) {
        let Some(msg) = NsMessage::from_bytes(payload) else {
            warn!(len = payload.len(), "malformed name-service message");
            return;
        };
        let name = msg.name_str();
        let transport = match channel.transport() {
            Ok(t) => t,
            Err(_) => return,
        };

        if msg.is_destroy() {
            info!(service = %name, addr = msg.addr, "name service: destroy");
            if !transport.destroy_channel_by(&name, msg.addr) {
                warn!(service = %name, addr = msg.addr, "destroy for unknown channel");
            }
        } else {
            info!(service = %name, addr = msg.addr, "name service: create");
            if let Err(e) = transport.create_channel(&name, ADDR_ANY, msg.addr) {
                warn!(service = %name, error = %e, "channel creation failed");
            }
        }
    }
}

/// Announce a locally created service to the remote name service.
///
/// The channel must have a bound source address.
pub fn publish(channel: &Channel) -> Result<(), Error> {
    let src = channel.src();
    if src == ADDR_ANY {
        return Err(Error::InvalidAddress { src, dst: NS_ADDR });
    }
    let msg = NsMessage::create(channel.name(), src);
    channel.send_off_channel(src, NS_ADDR, &msg.to_bytes())
}

/// Retract a previously published service.
pub fn publish_destroy(channel: &Channel) -> Result<(), Error> {
    let src = channel.src();
    if src == ADDR_ANY {
        return Err(Error::InvalidAddress { src, dst: NS_ADDR });
    }
    let msg = NsMessage::destroy(channel.name(), src);
    channel.send_off_channel(src, NS_ADDR, &msg.to_bytes())
}
