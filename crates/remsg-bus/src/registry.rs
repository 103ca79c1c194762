//! Client drivers and the channel/driver registry.
//!
//! Drivers are capability records dispatched through a trait object: a
//! table of service names, a `probe` run once per matched channel, a
//! `remove` run at teardown, and the receive callback installed on the
//! channel's primary endpoint. Matching is exact name equality.
//!
//! The registry is deliberately minimal: a mutex-protected list of
//! drivers plus the live channels, with bind/unbind as the only
//! interesting operations. Binding creates the channel's primary endpoint
//! at `channel.src` (allocating when `ADDR_ANY`), writes the effective
//! address back, then probes the driver; unbinding destroys the endpoint
//! first so delivery is quiesced before the driver's `remove` runs.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use remsg_core::Error;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::endpoint::RxCallback;
use crate::ns::NsDriver;

/// A client driver: the capability record matched against channel names.
pub trait Driver: Send + Sync {
    /// Service names this driver handles.
    fn id_table(&self) -> &[&str];

    /// Called once when a channel is bound. The channel's primary endpoint
    /// already exists and `channel.src()` is final.
    fn probe(&self, channel: &Arc<Channel>) -> Result<(), Error>;

    /// Called when the channel goes away. The primary endpoint has
    /// already been destroyed.
    fn remove(&self, _channel: &Arc<Channel>) {}

    /// Receive callback for the channel's primary endpoint.
    fn callback(&self, channel: &Arc<Channel>, payload: &[u8], src: u32);
}

struct RegistryInner {
    drivers: Vec<Arc<dyn Driver>>,
    channels: Vec<Weak<Channel>>,
}

/// Matches named channels to registered drivers.
///
/// Shared between the embedder (driver registration) and any number of
/// transports (channel lifecycle). Construction installs the built-in
/// name-service driver.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                drivers: Vec::new(),
                channels: Vec::new(),
            }),
        });
        // The name service is part of the bus, not a client.
        registry
            .register_driver(Arc::new(NsDriver))
            .expect("registering the built-in name service cannot fail");
        registry
    }

    /// Add a driver and bind any live unbound channels it matches.
    ///
    /// A probe failure on an existing channel is logged and does not fail
    /// the registration.
    pub fn register_driver(&self, driver: Arc<dyn Driver>) -> Result<(), Error> {
        let candidates: Vec<Arc<Channel>> = {
            let mut inner = self.inner.lock();
            inner.drivers.push(driver.clone());
            live_channels(&mut inner)
        };
        for chan in candidates {
            if chan.bound_driver().is_none() && name_match(&driver, chan.name()) {
                if let Err(e) = bind(&chan, &driver) {
                    warn!(channel = %chan.name(), error = %e, "probe failed");
                }
            }
        }
        Ok(())
    }

    /// Remove a driver, unbinding every channel bound to it.
    pub fn unregister_driver(&self, driver: &Arc<dyn Driver>) {
        let channels: Vec<Arc<Channel>> = {
            let mut inner = self.inner.lock();
            inner
                .drivers
                .retain(|d| !Arc::ptr_eq(d, driver));
            live_channels(&mut inner)
        };
        for chan in channels {
            let bound = chan
                .bound_driver()
                .is_some_and(|d| Arc::ptr_eq(&d, driver));
            if bound {
                unbind(&chan);
            }
        }
    }

    /// A channel came to life; match and bind it.
    pub(crate) fn add_channel(&self, channel: &Arc<Channel>) {
        let driver = {
            let mut inner = self.inner.lock();
            inner.channels.push(Arc::downgrade(channel));
            inner
                .drivers
                .iter()
                .find(|d| name_match(d, channel.name()))
                .cloned()
        };
        match driver {
            Some(driver) => {
                if let Err(e) = bind(channel, &driver) {
                    warn!(channel = %channel.name(), error = %e, "probe failed");
                }
            }
            None => debug!(channel = %channel.name(), "no driver for channel"),
        }
    }

    /// A channel is going away; unbind and forget it.
    pub(crate) fn remove_channel(&self, channel: &Arc<Channel>) {
        {
            let mut inner = self.inner.lock();
            inner.channels.retain(|w| {
                w.upgrade()
                    .is_some_and(|c| !Arc::ptr_eq(&c, channel))
            });
        }
        unbind(channel);
    }
}

fn name_match(driver: &Arc<dyn Driver>, name: &str) -> bool {
    driver.id_table().iter().any(|&id| id == name)
}

/// Upgrade the live channels and drop dead entries in passing.
fn live_channels(inner: &mut RegistryInner) -> Vec<Arc<Channel>> {
    let mut live = Vec::with_capacity(inner.channels.len());
    inner.channels.retain(|w| match w.upgrade() {
        Some(c) => {
            live.push(c);
            true
        }
        None => false,
    });
    live
}

/// Create the primary endpoint and probe the driver. On probe failure the
/// endpoint is torn back down and the channel returns to unbound.
fn bind(channel: &Arc<Channel>, driver: &Arc<dyn Driver>) -> Result<(), Error> {
    let transport = channel.transport()?;

    let ept = {
        let mut binding = channel.binding.lock();
        if binding.driver.is_some() {
            return Ok(());
        }
        let cb_driver = driver.clone();
        let cb: RxCallback =
            Arc::new(move |chan, payload, src| cb_driver.callback(chan, payload, src));
        let ept = transport.create_endpoint(channel, cb, channel.src())?;
        channel.set_src(ept.addr());
        binding.driver = Some(driver.clone());
        binding.ept = Some(ept.clone());
        ept
    };

    if let Err(e) = driver.probe(channel) {
        let mut binding = channel.binding.lock();
        binding.driver = None;
        binding.ept = None;
        drop(binding);
        transport.destroy_endpoint(&ept);
        return Err(e);
    }
    debug!(channel = %channel.name(), src = channel.src(), "driver bound");
    Ok(())
}

/// Destroy the primary endpoint, then run the driver's `remove`.
fn unbind(channel: &Arc<Channel>) {
    let (driver, ept) = {
        let mut binding = channel.binding.lock();
        (binding.driver.take(), binding.ept.take())
    };
    if let Some(ept) = ept {
        if let Ok(transport) = channel.transport() {
            transport.destroy_endpoint(&ept);
        }
    }
    if let Some(driver) = driver {
        driver.remove(channel);
    }
}
