//! songgate client SDK.
//!
//! Used by the generation pipeline to report completed songs and spend
//! credits, and by the web front end's server side to gate generations and
//! merge guest history at login.
//!
//! # Example
//!
//! ```no_run
//! use songgate_client::{Caller, ClientError, Decision, GenerationCompleted, SonggateClient};
//! use songgate_core::{GenerationId, GuestId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SonggateClient::new("http://songgate:8080", "your-service-api-key")?;
//! let guest = GuestId::new("3f0c2a")?;
//!
//! match client.authorize(&Caller::guest(guest.clone()), None).await {
//!     Ok(auth) if auth.decision == Decision::Free => {
//!         // ... generate the song, then:
//!         client
//!             .generation_completed(&GenerationCompleted {
//!                 generation_id: GenerationId::new("song-123")?,
//!                 guest_id: Some(guest),
//!                 account_id: None,
//!                 transaction_id: None,
//!                 last_known_address: None,
//!             })
//!             .await?;
//!     }
//!     Ok(_) => {}
//!     Err(ClientError::PaymentRequired { reason, .. }) => {
//!         println!("show the paywall: {reason}");
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, SonggateClient};
pub use error::ClientError;
pub use types::*;
