use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use super::{guarded, Handler, Outbox, Outgoing};
use crate::pending::Expired;

/// Ages pending messages every tick. Expired messages are handed back to the sender as forced
/// resends; expired heartbeats raise a connectivity notification instead.
pub(super) fn run(outbox: Outbox, handler: Arc<dyn Handler>) {
    let shared = Arc::clone(&outbox.shared);

    info!(role = %shared.role, "retry loop started");

    let tick = shared.tick();
    let timeout_ms = shared.config.retry_timeout_ms;

    let mut last_ms = shared.epoch.time_now_ms();

    'outer: while !shared.is_closed() {
        thread::sleep(tick);

        let delta_ms = shared.epoch.lap_ms(&mut last_ms);

        for expired in shared.pending.advance(delta_ms, timeout_ms) {
            match expired {
                Expired::Resend(envelope) => {
                    debug!(role = %shared.role, id = envelope.id, kind = %envelope.kind, "retry timeout");

                    let outgoing = Outgoing {
                        envelope,
                        resend: true,
                    };

                    if outbox.forced_tx.send(outgoing).is_err() {
                        break 'outer;
                    }
                }
                Expired::Heartbeat(id) => {
                    debug!(role = %shared.role, id, "heartbeat unanswered");

                    guarded(shared.role, "connectivity_changed", || {
                        handler.connectivity_changed(&outbox)
                    });
                }
            }
        }
    }

    info!(role = %shared.role, "retry loop ended");
}
