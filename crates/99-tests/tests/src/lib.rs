//! End-to-end scenarios across the transport, the dialects and the hub.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod harness;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod platform_e2e;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod bridge_e2e;
