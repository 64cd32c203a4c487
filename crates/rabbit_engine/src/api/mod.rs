/* 📖 # What does the api module expose?

The HTTP face of the engine. AnalysisService implements the HttpService trait from
rabbit_base, so the same service runs behind the real tiny_http server and can be
called directly from tests with hand-built requests.

Endpoints:
- `/ping` answers `pong`
- `/top-moves-hybrid` ranks placements for the current piece
- `/rate-move` rates the transition between two boards
*/

mod service;

pub use service::{AnalysisService, PING_PATH, error_response};
