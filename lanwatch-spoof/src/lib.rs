//! Active redirection for lanwatch
//!
//! [`ArpSpoofer`] poisons the ARP caches of selected targets and of the
//! gateway so their traffic flows through this host, and restores the
//! truthful bindings when it stops or is dropped. [`ArpResolver`] finds
//! hardware addresses for the session, [`ArpScanner`] sweeps a subnet so
//! the monitor learns quiet devices.
//!
//! Forwarding the redirected packets is the kernel's job; see
//! [`forwarding::ip_forwarding_state`].

pub mod forwarding;
pub mod resolver;
pub mod route;
pub mod scanner;
pub mod spoofer;

pub use forwarding::{ip_forwarding_state, ForwardingState};
pub use resolver::ArpResolver;
pub use route::default_gateway;
pub use scanner::ArpScanner;
pub use spoofer::{ArpSpoofer, Host, SpoofConfig, SpoofState, SpoofStatus};
