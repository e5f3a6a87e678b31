//! Post-scheduling sweep.
//!
//! Scheduling inserts speculatively: cached gates and delay stages can end
//! up with no consumers once merging settles. The sweep retires scheduling
//! artifacts nothing reads, then verifies the final connection invariant:
//! every used port of every live component is driven.
use std::collections::HashSet;

use silica_ir::{BusIdx, ComponentKind, Design};
use silica_utils::{Error, SilicaResult};

pub fn sweep(design: &mut Design) -> SilicaResult<usize> {
    let mut retired_total = 0;
    loop {
        let mut consumed: HashSet<BusIdx> = HashSet::new();
        for (_, port) in design.ports.iter() {
            let owner_retired =
                design.components[port.owner].retired;
            if let Some(bus) = port.driver {
                if !owner_retired {
                    consumed.insert(bus);
                }
            }
        }

        let mut retired_now = 0;
        for idx in design.components.keys().collect::<Vec<_>>() {
            let comp = &design.components[idx];
            if comp.retired || !is_artifact(&comp.kind) {
                continue;
            }
            let read = comp.exits.iter().any(|&exit| {
                let exit = &design.exits[exit];
                consumed.contains(&exit.done_bus)
                    || exit
                        .data_buses
                        .iter()
                        .any(|b| consumed.contains(b))
            });
            if !read {
                design.components[idx].retired = true;
                retired_now += 1;
            }
        }
        retired_total += retired_now;
        if retired_now == 0 {
            break;
        }
    }
    if retired_total > 0 {
        log::info!("swept {retired_total} unread scheduling artifacts");
    }
    Ok(retired_total)
}

/// Kinds scheduling inserts on its own authority. Anything else came from
/// the front end and is not ours to delete.
fn is_artifact(kind: &ComponentKind) -> bool {
    matches!(
        kind,
        ComponentKind::And
            | ComponentKind::Or
            | ComponentKind::Mux
            | ComponentKind::Scoreboard
            | ComponentKind::Stallboard
            | ComponentKind::Latch
            | ComponentKind::ShiftReg { .. }
            | ComponentKind::Reg { .. }
            | ComponentKind::Constant { .. }
    )
}

/// The final say on graph health: a used port with no driver at this
/// point means some merge path forgot a connection.
pub fn verify_connections(design: &Design) -> SilicaResult<()> {
    for (idx, comp) in design.components.iter() {
        if comp.retired || comp.owner.is_none() {
            continue;
        }
        for &port in comp.ports.iter() {
            let port_data = &design.ports[port];
            if port_data.used && port_data.driver.is_none() {
                return Err(Error::internal(format!(
                    "port {} of {} is used but undriven after scheduling",
                    port_data.name,
                    design.describe(idx)
                )));
            }
        }
    }
    Ok(())
}
