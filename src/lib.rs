//! Local HTTP surface of the playback relay.
//!
//! The settings panel and the device talk to the relay through these routes:
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /status` | Whether a Spotify credential is stored |
//! | `POST /disconnect` | Delete the credential |
//! | `GET /current-track` | Reconciled playback state |
//! | `GET /health` | Liveness probe |
//! | `GET /auth` | Redirect to the Spotify consent page |
//! | `GET /callback` | OAuth redirect target |
//! | `POST /voice` | Dispatch a transcribed utterance |
//! | `POST /button` | Hardware button hint |

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
