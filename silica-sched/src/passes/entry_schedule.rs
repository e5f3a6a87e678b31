//! Merging a component's entries into one physical control connection.
//!
//! Each entry describes one way control can reach a component. Scheduling
//! resolves every entry to a single control bus with a known latency, then
//! merges the per-entry resolutions: one entry connects directly, several
//! entries meet in an OR of their controls with muxes selecting the data.
use std::collections::HashSet;

use linked_hash_map::LinkedHashMap;

use silica_ir::{
    Builder, BusIdx, BusValue, CompIdx, ComponentKind, DepKind, Design,
    EntryIdx, Latency, PortIdx,
};
use silica_utils::{Error, SilicaResult};

use crate::analysis::LatencyTracker;

/// One entry, resolved: the control bus that represents its arrival and
/// the data bus feeding each port along it.
pub struct EntrySchedule {
    pub entry: EntryIdx,
    pub control: BusIdx,
    pub latency: Latency,
    data: Vec<(PortIdx, BusIdx)>,
}

impl EntrySchedule {
    /// Resolve `entry` against the current tracker state. Every dependency
    /// must name a bus whose producer has already been scheduled; the
    /// sibling ordering guarantees that, so a miss is an internal error.
    pub fn new(
        design: &mut Design,
        tracker: &mut LatencyTracker,
        entry_idx: EntryIdx,
        balanced: bool,
    ) -> SilicaResult<Self> {
        let entry = design.entries[entry_idx].clone();
        let module =
            design.components[entry.owner].owner.ok_or_else(|| {
                Error::internal(format!(
                    "entry on {} which is outside any module",
                    design.describe(entry.owner)
                ))
            })?;
        let ambient = design.inbuf_done_bus(module)?;

        let mut candidates: Vec<(BusIdx, Latency)> = Vec::new();
        let mut data: Vec<(PortIdx, BusIdx)> = Vec::new();
        for (port, dep) in &entry.deps {
            match dep.kind {
                DepKind::Data => data.push((*port, dep.bus)),
                DepKind::Clock | DepKind::Reset => {}
                DepKind::Control | DepKind::Resource
                    if entry.feedback =>
                {
                    // An iteration edge restarts the time frame; its
                    // arrival is the module's own go.
                }
                DepKind::Control => {
                    let cb = control_of(design, tracker, dep.bus)?;
                    let lat = latency_of(design, tracker, cb)?;
                    candidates.push((cb, lat));
                }
                DepKind::Resource => {
                    let cb = control_of(design, tracker, dep.bus)?;
                    let delayed = tracker.delay_control(
                        design,
                        cb,
                        module,
                        dep.delay_clocks,
                    )?;
                    let lat = latency_of(design, tracker, delayed)?;
                    candidates.push((delayed, lat));
                }
            }
        }

        let (control, latency) = if candidates.is_empty() {
            let lat = tracker
                .latency_of_control(ambient)
                .unwrap_or(Latency::ZERO);
            (ambient, lat)
        } else {
            resolve_latest(design, tracker, &candidates, module)?
        };

        if !balanced && !entry.feedback {
            for (_, bus) in data.iter_mut() {
                *bus = tracker
                    .sync_data_to_control(design, *bus, control, module)?;
            }
        }

        Ok(EntrySchedule {
            entry: entry_idx,
            control,
            latency,
            data,
        })
    }

    /// Merge the resolved entries of `comp` into physical connections and
    /// record its merged control with the tracker.
    pub fn merge(
        design: &mut Design,
        tracker: &mut LatencyTracker,
        comp: CompIdx,
        scheds: Vec<EntrySchedule>,
        balanced: bool,
    ) -> SilicaResult<()> {
        let module = design.components[comp].owner.ok_or_else(|| {
            Error::internal(format!(
                "merging entries of {} which is outside any module",
                design.describe(comp)
            ))
        })?;

        let mut scheds = scheds;
        let control = match scheds.len() {
            0 => merge_none(design, comp, module)?,
            1 => {
                let sched = &mut scheds[0];
                if balanced {
                    sync_data_balanced(design, tracker, module, sched)?;
                }
                for &(port, bus) in &sched.data {
                    design.connect(port, bus);
                }
                sched.control
            }
            _ => {
                merge_many(design, tracker, comp, module, scheds, balanced)?
            }
        };

        if design.components[comp].consumes_go {
            let go = design.components[comp].go_port();
            if design.ports[go].driver.is_none() {
                design.connect(go, control);
            }
        }
        tracker.set_comp_control(comp, control);
        Ok(())
    }
}

/// A component no control ever reaches still needs defined inputs: tie
/// its go low and every data port to a fresh zero constant, and let its
/// timing be the module's ambient done so downstream lookups stay
/// answerable.
fn merge_none(
    design: &mut Design,
    comp: CompIdx,
    module: CompIdx,
) -> SilicaResult<BusIdx> {
    let ambient = design.inbuf_done_bus(module)?;
    if design.components[comp].consumes_go {
        let zero = ground(design, module, BusValue::control())?;
        let go = design.components[comp].go_port();
        design.connect(go, zero);
    }
    for port in design.components[comp].data_ports().to_vec() {
        if design.ports[port].driver.is_some() {
            continue;
        }
        let value = design.ports[port]
            .value
            .unwrap_or_else(BusValue::control);
        let zero = ground(design, module, value)?;
        design.connect(port, zero);
    }
    Ok(ambient)
}

/// A fresh zero constant in `module`, shaped as `value`.
fn ground(
    design: &mut Design,
    module: CompIdx,
    value: BusValue,
) -> SilicaResult<BusIdx> {
    let mut builder = Builder::new(design);
    let gnd = builder.add_component(
        "gnd",
        ComponentKind::Constant { value: 0 },
        0,
        1,
    );
    builder.design.add_to_module(gnd, module);
    let zero = design.result_bus(gnd)?;
    design.buses[zero].value = Some(value);
    Ok(zero)
}

fn merge_many(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    comp: CompIdx,
    module: CompIdx,
    mut scheds: Vec<EntrySchedule>,
    balanced: bool,
) -> SilicaResult<BusIdx> {
    // Two entries arriving on the same go bus are one entry the front end
    // failed to merge; ORing them would silently halve the arrival count.
    let distinct: HashSet<BusIdx> =
        scheds.iter().map(|s| s.control).collect();
    if distinct.len() != scheds.len() {
        return Err(Error::internal(format!(
            "non-unique go buses among the entries of {}",
            design.describe(comp)
        )));
    }

    if balanced {
        balance_controls(design, tracker, module, &mut scheds)?;
        for sched in scheds.iter_mut() {
            sync_data_balanced(design, tracker, module, sched)?;
        }
    }

    let controls: Vec<BusIdx> =
        scheds.iter().map(|s| s.control).collect();
    let or = tracker.cache.or(design, &controls, module);
    let merged = design.result_bus(or)?;
    let union = scheds
        .iter()
        .map(|s| s.latency)
        .reduce(|a, b| union_of(&a, &b))
        .ok_or_else(|| Error::internal("merging zero schedules"))?;
    tracker.define_control(design, merged, union);
    tracker.set_comp_control(or, merged);

    // Group data connections per port, preserving entry order; ports fed
    // the same bus from every entry connect directly, the rest go through
    // a mux selected by the entry controls.
    let mut per_port: LinkedHashMap<PortIdx, Vec<(BusIdx, BusIdx)>> =
        LinkedHashMap::new();
    for sched in &scheds {
        for &(port, bus) in &sched.data {
            per_port
                .entry(port)
                .or_insert_with(Vec::new)
                .push((sched.control, bus));
        }
    }
    for (port, pairs) in per_port {
        let first = pairs[0].1;
        if pairs.iter().all(|&(_, b)| b == first) {
            design.connect(port, first);
        } else {
            let mux = tracker.cache.mux(design, &pairs, module)?;
            let out = design.result_bus(mux)?;
            design.connect(port, out);
            tracker.set_comp_control(mux, merged);
        }
    }

    Ok(merged)
}

/// Pad every entry's control out to the longest fixed arrival so all
/// entries reach the component at the same latency. Open or unequal-range
/// arrivals cannot be padded to a single cycle; under balancing that is an
/// internal error, not a degradation.
fn balance_controls(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    module: CompIdx,
    scheds: &mut [EntrySchedule],
) -> SilicaResult<()> {
    let mut target = 0;
    for sched in scheds.iter() {
        if !sched.latency.is_fixed() {
            return Err(Error::internal(format!(
                "unable to balance control buses: {} arrives at {}",
                design.buses[sched.control].name, sched.latency
            )));
        }
        target = target.max(sched.latency.min_clocks());
    }
    for sched in scheds.iter_mut() {
        let have = sched.latency.min_clocks();
        if have < target {
            sched.control = tracker.delay_control(
                design,
                sched.control,
                module,
                target - have,
            )?;
            sched.latency = Latency::fixed(target);
        }
    }
    Ok(())
}

/// Delay every data bus of a balanced entry out to its control's arrival
/// cycle, so the consumer samples values the same cycle it fires. Data
/// whose producer has no tracked control is always valid and needs no
/// delay; anything without a fixed arrival cannot be balanced at all.
fn sync_data_balanced(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    module: CompIdx,
    sched: &mut EntrySchedule,
) -> SilicaResult<()> {
    let want = sched.latency.min_clocks();
    for (_, bus) in sched.data.iter_mut() {
        let Some(latency) = tracker.latency_of_bus(design, *bus) else {
            continue;
        };
        if !latency.is_fixed() {
            return Err(Error::internal(format!(
                "unable to balance data bus {}: valid at {latency}",
                design.buses[*bus].name
            )));
        }
        let have = latency.min_clocks();
        if have < want {
            *bus =
                tracker.delay_data(design, *bus, module, want - have)?;
        }
    }
    Ok(())
}

/// Reduce resolved controls to the latest arrivals and merge what remains
/// into a single control bus: the single survivor directly, several fixed
/// survivors through a scoreboard, and any open survivor through a
/// stallboard that waits out all of them.
fn resolve_latest(
    design: &mut Design,
    tracker: &mut LatencyTracker,
    candidates: &[(BusIdx, Latency)],
    module: CompIdx,
) -> SilicaResult<(BusIdx, Latency)> {
    let preferred: HashSet<BusIdx> = candidates
        .iter()
        .map(|&(b, _)| b)
        .filter(|&b| is_preferred(design, b))
        .collect();
    let latest = Latency::latest_of(candidates, &preferred);
    if latest.len() == 1 {
        return Ok(latest[0]);
    }

    let buses: Vec<BusIdx> = latest.iter().map(|&(b, _)| b).collect();
    if latest.iter().all(|(_, l)| !l.is_open()) {
        // All survivors are bounded but incomparable; a scoreboard fires
        // once the last of them has.
        let sb = tracker.cache.scoreboard(design, &buses, module);
        let out = design.result_bus(sb)?;
        let lat = latest
            .iter()
            .map(|(_, l)| *l)
            .reduce(|a, b| meet_of(&a, &b))
            .ok_or_else(|| Error::internal("empty latest set"))?;
        tracker.define_control(design, out, lat);
        tracker.set_comp_control(sb, out);
        Ok((out, lat))
    } else {
        // At least one arrival is open; only a stallboard can wait for
        // it, and the wait itself has no upper bound.
        let sb = tracker.cache.stallboard(design, &buses, module);
        let out = design.result_bus(sb)?;
        let min = latest
            .iter()
            .map(|(_, l)| l.min_clocks())
            .max()
            .unwrap_or(0);
        let lat = Latency::open(min);
        tracker.define_control(design, out, lat);
        tracker.set_comp_control(sb, out);
        Ok((out, lat))
    }
}

fn control_of(
    design: &Design,
    tracker: &LatencyTracker,
    bus: BusIdx,
) -> SilicaResult<BusIdx> {
    tracker.control_of_bus(design, bus).ok_or_else(|| {
        Error::internal(format!(
            "dependency on bus {} of unscheduled component {}",
            design.buses[bus].name,
            design.describe(design.bus_owner(bus))
        ))
    })
}

fn latency_of(
    design: &Design,
    tracker: &LatencyTracker,
    control: BusIdx,
) -> SilicaResult<Latency> {
    tracker.latency_of_control(control).ok_or_else(|| {
        Error::internal(format!(
            "control bus {} has no latency",
            design.buses[control].name
        ))
    })
}

/// Buses that already carry registered control are the cheapest to reuse
/// when several arrivals tie.
fn is_preferred(design: &Design, bus: BusIdx) -> bool {
    matches!(
        design.components[design.bus_owner(bus)].kind,
        ComponentKind::Reg {
            sync_done: true,
            ..
        } | ComponentKind::Scoreboard
            | ComponentKind::InBuf
    )
}

/// When either of two merged arrivals may fire the component, the merged
/// window spans both.
fn union_of(a: &Latency, b: &Latency) -> Latency {
    let min = a.min_clocks().min(b.min_clocks());
    match (a.max_clocks(), b.max_clocks()) {
        (Some(x), Some(y)) => Latency::range(min, x.max(y)),
        _ => Latency::open(min),
    }
}

/// When all arrivals must happen before the component fires, the merged
/// completion is the elementwise maximum.
fn meet_of(a: &Latency, b: &Latency) -> Latency {
    let min = a.min_clocks().max(b.min_clocks());
    match (a.max_clocks(), b.max_clocks()) {
        (Some(x), Some(y)) => Latency::range(min, x.max(y)),
        _ => Latency::open(min),
    }
}
