//! The core scheduling walk: modules bottom-up, siblings in dataflow
//! order, entries merged as each component is reached.
use silica_ir::{CompIdx, ComponentKind, Design, Latency};
use silica_utils::{Error, SilicaResult};

use crate::analysis::{
    dataflow_order, flop_removable, LatencyTracker,
};
use crate::passes::entry_schedule::EntrySchedule;

/// Schedule every task in the design, returning the tracker holding the
/// timing of everything that was connected.
pub fn schedule_design(
    design: &mut Design,
    balanced: bool,
) -> SilicaResult<LatencyTracker> {
    let mut tracker = LatencyTracker::new();
    for task in design.tasks.clone() {
        schedule_module(design, &mut tracker, task, balanced)?;
    }
    Ok(tracker)
}

/// Schedule the interior of `module` in its own time frame: the input
/// buffer's done defines cycle zero, every sibling is merged in dataflow
/// order, and the module's exit latency is read off the output buffer's
/// merged control.
pub fn schedule_module(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    module: CompIdx,
    balanced: bool,
) -> SilicaResult<()> {
    let data = design.components[module]
        .module_data()
        .cloned()
        .ok_or_else(|| {
            Error::internal(format!(
                "scheduling non-module {}",
                design.describe(module)
            ))
        })?;

    let cycle_zero = design.inbuf_done_bus(module)?;
    tracker.define_control(design, cycle_zero, Latency::ZERO);
    tracker.set_comp_control(data.inbuf, cycle_zero);

    for comp in dataflow_order(design, module)? {
        if comp == data.inbuf || design.components[comp].retired {
            continue;
        }
        if design.components[comp].is_module() {
            schedule_module(design, tracker, comp, balanced)?;
        }
        merge_entries(design, tracker, comp, balanced)?;
        if let ComponentKind::Loop { body, .. } =
            design.components[comp].kind
        {
            decide_loop_flop(design, tracker, body)?;
        }
    }

    finish_module(design, tracker, module, &data)
}

fn merge_entries(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    comp: CompIdx,
    balanced: bool,
) -> SilicaResult<()> {
    let entries = design.components[comp].entries.clone();
    let scheds = entries
        .into_iter()
        .map(|e| EntrySchedule::new(design, tracker, e, balanced))
        .collect::<SilicaResult<Vec<_>>>()?;
    EntrySchedule::merge(design, tracker, comp, scheds, balanced)?;
    tracker.update_exit_states(design, comp)
}

/// Once every sibling is merged, the output buffer's control is the
/// module's completion. Record it as the module's intrinsic exit latency
/// for the enclosing frame. A loop completes once per execution but
/// iterates internally, so its exit stays open.
fn finish_module(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    module: CompIdx,
    data: &silica_ir::ModuleData,
) -> SilicaResult<()> {
    let ob_control =
        tracker.comp_control(data.outbuf).ok_or_else(|| {
            Error::internal(format!(
                "output buffer of {} was never merged",
                design.describe(module)
            ))
        })?;
    let mut latency =
        tracker.latency_of_control(ob_control).ok_or_else(|| {
            Error::internal(format!(
                "control bus {} has no latency",
                design.buses[ob_control].name
            ))
        })?;
    if matches!(design.components[module].kind, ComponentKind::Loop { .. })
    {
        latency = Latency::open(latency.min_clocks());
    }
    if let Some(exit) = design.done_exit(module) {
        design.exits[exit].latency = latency;
    }
    Ok(())
}

/// A scheduled loop body has everything the feedback analysis needs;
/// decide here whether its iteration flop stays.
fn decide_loop_flop(
    design: &mut Design,
    tracker: &LatencyTracker,
    body: CompIdx,
) -> SilicaResult<()> {
    let removable = flop_removable(design, tracker, body)?;
    if let ComponentKind::LoopBody { flop_needed, .. } =
        &mut design.components[body].kind
    {
        *flop_needed = !removable;
        if removable {
            log::debug!(
                "iteration flop of {} is removable",
                design.describe(body)
            );
        }
    }
    Ok(())
}
