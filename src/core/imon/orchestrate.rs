// src/core/imon/orchestrate.rs

//! Per-`global_expect` orchestrators: pure functions of the current state
//! that decide no-op, a transition into a `doing` state (with a CRM verb to
//! invoke), or a "reached" decision that clears `global_expect`.

use chrono::Utc;

use crate::core::model::instance::{GlobalExpect, MonitorState};

use super::crm::CrmVerb;
use super::leader::{self, is_ha_orchestrateable, is_started};
use super::ImonState;

/// What the Ready->doing promotion should recheck once `ReadyDuration`
/// elapses: plain orchestrators gate on soft leadership, `placed@` gates on
/// still being the resolved destination (leadership is unrelated to it).
#[derive(Clone)]
pub enum ActiveCheck {
    Leader,
    Destination(String),
}

/// What the orchestrate step wants to do this tick.
pub enum Decision {
    NoOp,
    /// Enter `doing`, run `verb`, and resolve to `success`/`error` on
    /// completion.
    Enter {
        doing: MonitorState,
        verb: CrmVerb,
        success: MonitorState,
        error: MonitorState,
        active: ActiveCheck,
    },
}

/// Runs the full orchestration loop step for one tick: reached detection,
/// then dispatch. Mutates `state` in place (global_expect clears, state
/// transitions for the bookkeeping states that need no CRM call) and
/// returns a `Decision` describing any CRM action the caller (the imon
/// actor) should spawn.
pub fn orchestrate(state: &mut ImonState) -> Decision {
    if clear_if_reached(state) {
        return Decision::NoOp;
    }

    if !state.monitor.state.is_resting() {
        // Already mid-action; nothing new to dispatch until it completes.
        return Decision::NoOp;
    }

    if state.view.has_other_node_doing(&state.localhost) {
        tracing::debug!(path = %state.path, "peer is doing, staying idle");
        return Decision::NoOp;
    }

    match state.monitor.global_expect {
        GlobalExpect::Empty | GlobalExpect::Unset | GlobalExpect::Aborted => Decision::NoOp,
        GlobalExpect::Started => orchestrate_started(state),
        GlobalExpect::Stopped => orchestrate_stopped(state),
        GlobalExpect::Frozen => orchestrate_frozen(state),
        GlobalExpect::Thawed => orchestrate_thawed(state),
        GlobalExpect::Provisioned => orchestrate_provisioned(state),
        GlobalExpect::Unprovisioned => orchestrate_unprovisioned(state),
        GlobalExpect::Purged => orchestrate_purged(state),
        GlobalExpect::Placed | GlobalExpect::PlacedAt => orchestrate_placed(state),
    }
}

/// Reached-detection: runs at the start of each invocation so a converged
/// tick finalizes in one step.
fn clear_if_reached(state: &mut ImonState) -> bool {
    let reached = match state.monitor.global_expect {
        GlobalExpect::Empty | GlobalExpect::Unset | GlobalExpect::Aborted => false,
        GlobalExpect::Started => is_started(state),
        GlobalExpect::Stopped => !is_started(state),
        GlobalExpect::Frozen => state.status.is_frozen(),
        GlobalExpect::Thawed => !state.status.is_frozen(),
        GlobalExpect::Provisioned => {
            matches!(
                state.status.provisioned,
                crate::core::model::instance::Provisioned::True
            )
        }
        GlobalExpect::Unprovisioned => {
            matches!(
                state.status.provisioned,
                crate::core::model::instance::Provisioned::False
            )
        }
        GlobalExpect::Purged => {
            matches!(
                state.status.provisioned,
                crate::core::model::instance::Provisioned::False
            ) && !is_started(state)
        }
        GlobalExpect::Placed | GlobalExpect::PlacedAt => match resolve_placed_destination(state) {
            Some(destination) if destination == state.localhost => is_started(state),
            Some(_) => !is_started(state),
            // No destination resolvable yet; nothing to clear.
            None => false,
        },
    };
    if reached && state.monitor.global_expect != GlobalExpect::Empty {
        state.monitor.global_expect = GlobalExpect::Unset;
        state.monitor.global_expect_updated = Utc::now();
        state.change = true;
        tracing::info!(path = %state.path, "global expect reached, cleared");
    }
    reached
}

fn orchestrate_started(state: &mut ImonState) -> Decision {
    if let (false, reason) = is_ha_orchestrateable(state) {
        tracing::info!(path = %state.path, reason, "not ha-orchestrateable, staying idle");
        return Decision::NoOp;
    }
    if !state.monitor.is_leader {
        set_state(state, MonitorState::WaitLeader);
        return Decision::NoOp;
    }
    // Ready gating: the caller is responsible for honoring ReadyDuration
    // before promoting Ready -> Starting; here we model the two-step
    // transition directly since imon::mod drives the timer.
    Decision::Enter {
        doing: MonitorState::Starting,
        verb: CrmVerb::Start,
        success: MonitorState::Idle,
        error: MonitorState::StartFailed,
        active: ActiveCheck::Leader,
    }
}

fn orchestrate_stopped(state: &mut ImonState) -> Decision {
    if !state.monitor.is_leader {
        set_state(state, MonitorState::WaitNonLeader);
        return Decision::NoOp;
    }
    Decision::Enter {
        doing: MonitorState::Stopping,
        verb: CrmVerb::Stop,
        success: MonitorState::Idle,
        error: MonitorState::StopFailed,
        active: ActiveCheck::Leader,
    }
}

fn orchestrate_frozen(_state: &mut ImonState) -> Decision {
    Decision::Enter {
        doing: MonitorState::Freezing,
        verb: CrmVerb::Freeze,
        success: MonitorState::Idle,
        error: MonitorState::FrozenFailed,
        active: ActiveCheck::Leader,
    }
}

fn orchestrate_thawed(_state: &mut ImonState) -> Decision {
    Decision::Enter {
        doing: MonitorState::Thawing,
        verb: CrmVerb::Unfreeze,
        success: MonitorState::Idle,
        error: MonitorState::ThawedFailed,
        active: ActiveCheck::Leader,
    }
}

fn orchestrate_provisioned(_state: &mut ImonState) -> Decision {
    Decision::Enter {
        doing: MonitorState::Provisioning,
        verb: CrmVerb::Provision,
        success: MonitorState::Idle,
        error: MonitorState::ProvisioningFailed,
        active: ActiveCheck::Leader,
    }
}

fn orchestrate_unprovisioned(_state: &mut ImonState) -> Decision {
    Decision::Enter {
        doing: MonitorState::Unprovisioning,
        verb: CrmVerb::Unprovision,
        success: MonitorState::Idle,
        error: MonitorState::UnprovisioningFailed,
        active: ActiveCheck::Leader,
    }
}

fn orchestrate_purged(_state: &mut ImonState) -> Decision {
    Decision::Enter {
        doing: MonitorState::Purging,
        verb: CrmVerb::Purge,
        success: MonitorState::Idle,
        error: MonitorState::PurgeFailed,
        active: ActiveCheck::Leader,
    }
}

/// Resolves `placed@`'s destination node: the requested list if one was
/// given (rejected on flex topology and intersected against known
/// instances), otherwise the policy-ranked automatic candidate.
fn resolve_placed_destination(state: &ImonState) -> Option<String> {
    if state.monitor.global_expect_options.destination.is_empty() {
        leader::next_placed_at_candidate(state)
    } else {
        let want = state.monitor.global_expect_options.destination.clone();
        leader::next_placed_at_candidates(state, &want)
    }
}

/// `placed@`: resolve a destination (explicit or automatic), then start on
/// the destination node and stop everywhere else. This is independent of
/// `is_leader`/`is_ha_leader` (those rank by placement policy over the
/// whole scope; `placed@` already picked its single destination), so the
/// destination check is made directly rather than delegating to
/// `orchestrate_started`/`orchestrate_stopped`.
fn orchestrate_placed(state: &mut ImonState) -> Decision {
    let Some(destination) = resolve_placed_destination(state) else {
        tracing::info!(path = %state.path, "no destination node could be selected");
        return Decision::NoOp;
    };
    if destination == state.localhost {
        if let (false, reason) = is_ha_orchestrateable(state) {
            tracing::info!(path = %state.path, reason, "not ha-orchestrateable, staying idle");
            return Decision::NoOp;
        }
        Decision::Enter {
            doing: MonitorState::Starting,
            verb: CrmVerb::Start,
            success: MonitorState::Idle,
            error: MonitorState::StartFailed,
            active: ActiveCheck::Destination(destination),
        }
    } else {
        Decision::Enter {
            doing: MonitorState::Stopping,
            verb: CrmVerb::Stop,
            success: MonitorState::Idle,
            error: MonitorState::StopFailed,
            active: ActiveCheck::Destination(destination),
        }
    }
}

fn set_state(state: &mut ImonState, new: MonitorState) {
    if state.monitor.state != new {
        state.monitor.state = new;
        state.monitor.state_updated = Utc::now();
        state.change = true;
    }
}
