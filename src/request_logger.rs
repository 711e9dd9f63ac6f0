use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Status;
use rocket::{Data, Request, Response};
use std::time::Instant;

/// One log line per request: method, URI, status and elapsed time.
pub struct RequestLogger;

fn is_upgrade(request: &Request<'_>, status: Status) -> bool {
    status == Status::SwitchingProtocols
        || request
            .headers()
            .get_one("Upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let elapsed_ms = request.local_cache(Instant::now).elapsed().as_secs_f64() * 1000.0;
        let status = response.status();

        // Upgrades stay open for the life of the socket; the timing is meaningless.
        if is_upgrade(request, status) {
            log::debug!("{} {} -> websocket upgrade ({})", request.method(), request.uri(), status.code);
            return;
        }

        if status.code >= 500 {
            log::warn!(
                "{} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                status.code,
                elapsed_ms
            );
        } else {
            log::info!(
                "{} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                status.code,
                elapsed_ms
            );
        }
    }
}
