//! Latency balancing for conditionals inside loops.
//!
//! A branch whose arms take different numbers of cycles makes the loop's
//! iteration latency data-dependent, which blocks the feedback analysis
//! from proving anything about first and last cycles. When both arms have
//! a provable fixed latency, padding the shorter arm out to the longer one
//! restores a fixed iteration latency at the cost of idle cycles on the
//! short path. Branches outside loops are left alone; there the variable
//! latency is harmless and the padding would be pure waste.
use std::collections::HashMap;

use silica_ir::{
    CompIdx, ComponentKind, Dependency, Design, Latency,
};
use silica_utils::{Error, SilicaResult};

use crate::analysis::{dataflow_order, lift_to_sibling};

/// Balance every in-loop branch. Arms with provable fixed latencies are
/// padded to agree; a branch with an undecidable arm is delayed by a
/// cycle as a whole. Returns the number of paddings applied.
pub fn balance_branches(design: &mut Design) -> SilicaResult<usize> {
    let mut padded = 0;
    for task in design.tasks.clone() {
        visit(design, task, false, &mut padded)?;
    }
    if padded > 0 {
        log::info!("padded {padded} branch arms to fixed latency");
    }
    Ok(padded)
}

fn visit(
    design: &mut Design,
    module: CompIdx,
    in_loop: bool,
    padded: &mut usize,
) -> SilicaResult<()> {
    let children = match design.components[module].module_data() {
        Some(data) => data.components.clone(),
        None => return Ok(()),
    };
    for comp in children {
        match design.components[comp].kind.clone() {
            ComponentKind::Loop { .. } => {
                visit(design, comp, true, padded)?;
            }
            ComponentKind::Branch {
                true_arm,
                false_arm,
                ..
            } => {
                visit(design, comp, in_loop, padded)?;
                if in_loop {
                    balance_arms(
                        design, comp, true_arm, false_arm, padded,
                    )?;
                }
            }
            kind if kind.is_module() => {
                visit(design, comp, in_loop, padded)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn balance_arms(
    design: &mut Design,
    branch: CompIdx,
    true_arm: CompIdx,
    false_arm: CompIdx,
    padded: &mut usize,
) -> SilicaResult<()> {
    let (Some(t), Some(f)) = (
        estimate_latency(design, true_arm)?,
        estimate_latency(design, false_arm)?,
    ) else {
        // One arm has open or unprovable timing, so the arms cannot be
        // made to agree. Delaying the branch itself at least keeps it
        // from completing in the cycle it starts.
        pad_module(design, branch, 1)?;
        *padded += 1;
        return Ok(());
    };
    if t == f {
        return Ok(());
    }
    let (short, target) =
        if t < f { (true_arm, f) } else { (false_arm, t) };
    pad_module(design, short, target)?;
    *padded += 1;
    Ok(())
}

/// Conservative pre-scheduling latency of a module: the longest dependency
/// path through its children, using intrinsic exit latencies. `None` when
/// any child is open or itself unestimable, whether or not a dependency
/// path ties it to the output buffer yet; scheduling may still sequence
/// the completion behind it.
pub(crate) fn estimate_latency(
    design: &Design,
    module: CompIdx,
) -> SilicaResult<Option<u32>> {
    let Some(data) = design.components[module].module_data() else {
        return Err(Error::internal(format!(
            "estimating latency of non-module {}",
            design.describe(module)
        )));
    };
    let order = dataflow_order(design, module)?;
    let mut finish: HashMap<CompIdx, u32> = HashMap::new();
    let mut worst = 0;
    let mut completion = None;
    for comp in order {
        let mut start = 0;
        for &entry in &design.components[comp].entries {
            let entry = &design.entries[entry];
            if entry.feedback {
                continue;
            }
            for (_, dep) in &entry.deps {
                let Some(producer) = lift_to_sibling(
                    design,
                    module,
                    design.bus_owner(dep.bus),
                ) else {
                    continue;
                };
                if let Some(&f) = finish.get(&producer) {
                    start = start.max(f + dep.delay_clocks);
                }
            }
        }
        let own = if design.components[comp].is_module() {
            match estimate_latency(design, comp)? {
                Some(clocks) => Latency::fixed(clocks),
                None => return Ok(None),
            }
        } else {
            match design.done_exit(comp) {
                Some(exit) => design.exits[exit].latency,
                None => Latency::ZERO,
            }
        };
        if !own.is_fixed() {
            return Ok(None);
        }
        let f = start + own.min_clocks();
        finish.insert(comp, f);
        worst = worst.max(f);
        if comp == data.outbuf {
            completion = Some(f);
        }
    }
    // The output buffer is the completion point when it has one.
    Ok(Some(completion.unwrap_or(worst)))
}

/// Force `module` to take at least `clocks` cycles by sequencing its
/// completion against a delayed image of its own start.
fn pad_module(
    design: &mut Design,
    module: CompIdx,
    clocks: u32,
) -> SilicaResult<()> {
    let start = design.inbuf_done_bus(module)?;
    let data = design.components[module].module_data().ok_or_else(|| {
        Error::internal(format!(
            "padding non-module {}",
            design.describe(module)
        ))
    })?;
    let outbuf = data.outbuf;
    let go = design.components[outbuf].go_port();
    let entry = match design.components[outbuf].entries.first() {
        Some(&e) => e,
        None => design.add_entry(outbuf),
    };
    design.entries[entry]
        .add_dependency(go, Dependency::resource(start, clocks));
    log::debug!(
        "padding {} to {clocks} cycles",
        design.describe(module)
    );
    Ok(())
}
