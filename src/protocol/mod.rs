//! Protocol engines behind the non-console backends.
//!
//! Each engine implements `backend::Engine` and is wrapped by a
//! `BackendAdapter`; none of them knows about lifecycle state.
//!
//! | Engine | Transport |
//! |---|---|
//! | `HttpEngine` | axum on the raw listener |
//! | `FtpEngine` | control channel lines |
//! | `SmtpEngine` | command lines + DATA |
//! | `SmbEngine` | NetBIOS frames |
//! | `MqttEngine` | MQTT 3.1.1 packets |

pub mod ftp;
pub mod http;
pub mod mqtt;
pub mod smb;
pub mod smtp;

pub use ftp::FtpEngine;
pub use http::HttpEngine;
pub use mqtt::MqttEngine;
pub use smb::SmbEngine;
pub use smtp::SmtpEngine;
