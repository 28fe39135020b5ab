use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};

/// Sequence number tying a request's log lines to its response's.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Wraps to zero on overflow.
    pub fn next() -> RequestId {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        RequestId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The id of `req`, assigned on first use.
    pub fn of<'r>(req: &'r Request<'_>) -> &'r RequestId {
        req.local_cache(RequestId::next)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RequestId::of(req))
    }
}

struct Arrival(Instant);

/// "name (uri)" for a named route, the bare uri otherwise.
fn route_label(req: &Request<'_>) -> String {
    match req.route() {
        Some(route) => match &route.name {
            Some(name) => format!("{name} ({})", route.uri),
            None => route.uri.to_string(),
        },
        None => "no matching route".to_string(),
    }
}

/// Access log for the HTTP surface, plus a line each when serving starts
/// and stops.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Access log",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let config = rocket.config();
        let scheme = if config.tls_enabled() { "https" } else { "http" };
        info!(
            "Election read model available at {scheme}://{}:{}/election",
            config.address, config.port
        );
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        req.local_cache(|| Arrival(Instant::now()));
        let id = RequestId::of(req);
        info!("->req{id} {} {}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = RequestId::of(req);
        let took = req.local_cache(|| Arrival(Instant::now())).0.elapsed();
        let status = res.status();
        let line = format!(
            "<-rsp{id} {status} {} in {}ms",
            route_label(req),
            took.as_millis()
        );
        match status.class() {
            StatusClass::ServerError => error!("{line}"),
            StatusClass::ClientError => warn!("{line}"),
            _ => info!("{line}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("HTTP server stopping; election sync will be disposed");
    }
}
