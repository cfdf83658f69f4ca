//! The periodic reconcile pass
//!
//! One pass is a pure function of the rendezvous view taken at its start
//! plus the current registry, in four phases:
//!
//! 1. purge records whose id left the view
//! 2. merge the view in, requesting addresses for newly discovered ids
//! 3. select endpoints for records that have candidates but no endpoint
//!    (probes run outside the registry lock)
//! 4. if any endpoint is new, introduce ourselves to every peer still
//!    marked unknown that has an endpoint
//!
//! On a stable view a second back-to-back pass purges nothing, discovers
//! nothing, selects nothing and therefore sends no introductions.

use std::sync::atomic::Ordering;

use overlay_core::peer::PeerObservation;
use overlay_core::selector::{select_endpoint, LocalNet, Probe};
use overlay_core::wire::Message;

use crate::rendezvous::Rendezvous;
use crate::router::RouterCtx;

/// What one pass did; logged by the supervisor and asserted by tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub purged: usize,
    pub discovered: usize,
    pub new_endpoints: usize,
    pub intros_sent: usize,
}

/// Run one reconcile pass against a snapshot of the rendezvous view
pub fn reconcile_pass(
    ctx: &RouterCtx,
    rendezvous: &dyn Rendezvous,
    view: &[PeerObservation],
    local_nets: &[LocalNet],
    probe: &dyn Probe,
) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    let unresolved = {
        let mut registry = ctx.registry.write().expect("registry lock poisoned");
        summary.purged = registry.purge(view);
        let discovered = registry.merge(view);
        summary.discovered = discovered.len();
        for id in &discovered {
            log::debug!("requesting addresses for {}", id);
            rendezvous.request_addresses(id);
        }
        registry.unresolved()
    };

    for (id, candidates) in unresolved {
        if let Some(endpoint) = select_endpoint(&candidates, local_nets, probe) {
            let stored = ctx
                .registry
                .write()
                .expect("registry lock poisoned")
                .set_endpoint(&id, endpoint);
            if stored {
                summary.new_endpoints += 1;
            }
        }
    }

    if summary.new_endpoints > 0 {
        let pending = ctx
            .registry
            .read()
            .expect("registry lock poisoned")
            .pending_intros();
        let intro = Message::intro(&ctx.local_intro.encode(), 0);
        for (id, endpoint) in pending {
            log::debug!("introducing to {} ({})", id, endpoint);
            match ctx.udp.send(&intro, endpoint) {
                Ok(_) => {
                    summary.intros_sent += 1;
                    ctx.metrics.intros_sent_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => log::error!("introduction to {}: {}", endpoint, e),
            }
        }
    }

    ctx.metrics
        .reconcile_passes_total
        .fetch_add(1, Ordering::Relaxed);
    summary
}
