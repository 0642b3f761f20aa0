use std::collections::BTreeSet;
use std::net::TcpListener;
use tracing::warn;

/// Upper bound on probes per reservation.
const MAX_PROBES: u16 = 4096;

/// Reserve the first port at or above `base` that is not already taken in
/// this run and actually binds on loopback.
///
/// The listener is dropped immediately after probing; a child claiming the
/// port later can still lose the race. That gap is accepted: the gateway's
/// own bind is the authoritative failure signal, surfaced as a readiness
/// timeout for that instance only. If every probe fails the base port is
/// returned anyway rather than wedging the whole run.
pub fn reserve_port(base: u16, taken: &mut BTreeSet<u16>) -> u16 {
    for offset in 0..MAX_PROBES {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        if taken.contains(&port) {
            continue;
        }
        if bindable(port) {
            taken.insert(port);
            return port;
        }
    }
    warn!(base, "no bindable port found; falling back to base");
    taken.insert(base);
    base
}

fn bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
