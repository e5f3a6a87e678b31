//! Structural retiming: combinational depth pipelining, multiplier
//! pipelining, task depth adjustment, shift-register compaction, and I/O
//! block register placement.
use std::collections::HashMap;

use silica_ir::{
    Builder, BusIdx, CompIdx, ComponentKind, DepKind, Design, Latency,
    PortIdx, RegMode,
};
use silica_utils::{Error, SilicaResult};

use crate::analysis::{dataflow_order, lift_to_sibling, LatencyTracker};

/// Break long combinational operator chains by registering intermediate
/// results. `max_depth` is the number of zero-latency operators tolerated
/// between registered points; an operator past the limit has its result
/// declared one cycle late, and scheduling grows the matching control
/// chain. Returns how many operators were registered.
pub fn pipeline_operations(
    design: &mut Design,
    max_depth: u32,
) -> SilicaResult<usize> {
    let mut registered = 0;
    for task in design.tasks.clone() {
        pipeline_module(design, task, max_depth, &mut registered)?;
    }
    if registered > 0 {
        log::info!(
            "registered {registered} operator results to bound \
             combinational depth"
        );
    }
    Ok(registered)
}

fn pipeline_module(
    design: &mut Design,
    module: CompIdx,
    max_depth: u32,
    registered: &mut usize,
) -> SilicaResult<()> {
    // Combinational operator depth at each child's output; anything
    // registered, module-shaped, or non-operator resets the count.
    let mut depth: HashMap<CompIdx, u32> = HashMap::new();
    for comp in dataflow_order(design, module)? {
        if design.components[comp].is_module() {
            pipeline_module(design, comp, max_depth, registered)?;
            depth.insert(comp, 0);
            continue;
        }
        if !matches!(design.components[comp].kind, ComponentKind::Op(_)) {
            depth.insert(comp, 0);
            continue;
        }
        let Some(exit) = design.done_exit(comp) else {
            continue;
        };
        if design.exits[exit].latency != Latency::ZERO {
            depth.insert(comp, 0);
            continue;
        }
        let mut incoming = 0;
        for &entry in &design.components[comp].entries {
            let entry = &design.entries[entry];
            if entry.feedback {
                continue;
            }
            for (_, dep) in &entry.deps {
                if dep.kind != DepKind::Data {
                    continue;
                }
                let Some(producer) = lift_to_sibling(
                    design,
                    module,
                    design.bus_owner(dep.bus),
                ) else {
                    continue;
                };
                if let Some(&d) = depth.get(&producer) {
                    incoming = incoming.max(d);
                }
            }
        }
        if incoming + 1 > max_depth {
            design.exits[exit].latency = Latency::ONE;
            depth.insert(comp, 0);
            *registered += 1;
        } else {
            depth.insert(comp, incoming + 1);
        }
    }
    Ok(())
}

/// Declare every multiplier to take `stages` cycles. Scheduling then
/// derives the matching control chain, and emission maps the stages onto
/// the hard multiplier's pipeline registers. Zero stages leaves
/// multipliers combinational.
pub fn pipeline_multipliers(design: &mut Design, stages: u32) {
    if stages == 0 {
        return;
    }
    let mut count = 0;
    for idx in design.components.keys().collect::<Vec<_>>() {
        if matches!(
            design.components[idx].kind,
            ComponentKind::Op(silica_ir::OpKind::Mul)
        ) {
            if let Some(exit) = design.done_exit(idx) {
                design.exits[exit].latency = Latency::fixed(stages);
                count += 1;
            }
        }
    }
    if count > 0 {
        log::info!("pipelined {count} multipliers to {stages} stages");
    }
}

/// Guarantee every task takes at least one cycle, so its done handshake
/// is registered rather than a combinational echo of its go. Runs after
/// scheduling: a combinational task's completion control is replaced by a
/// one-cycle delayed image of itself.
pub fn adjust_task_depth(
    design: &mut Design,
    tracker: &mut LatencyTracker,
) -> SilicaResult<()> {
    for task in design.tasks.clone() {
        let Some(data) = design.components[task].module_data() else {
            continue;
        };
        let outbuf = data.outbuf;
        let Some(latency) = tracker.latency_of_comp(outbuf) else {
            continue;
        };
        if latency.min_clocks() > 0 {
            continue;
        }
        let go = design.components[outbuf].go_port();
        let Some(driver) = design.ports[go].driver else {
            continue;
        };
        let delayed = tracker.delay_control(design, driver, task, 1)?;
        design.connect(go, delayed);
        tracker.set_comp_control(outbuf, delayed);
        if let Some(exit) = design.done_exit(task) {
            design.exits[exit].latency = tracker
                .latency_of_control(delayed)
                .ok_or_else(|| {
                    Error::internal(format!(
                        "delayed completion of {} has no latency",
                        design.describe(task)
                    ))
                })?;
        }
        log::debug!(
            "task {} was combinational; registered its done",
            design.describe(task)
        );
    }
    Ok(())
}

/// Minimum chain length worth compacting. A lone register or a pair is
/// cheaper left as flops.
const MIN_CHAIN: usize = 3;

/// Collapse chains of simple data registers into shift-register
/// primitives. Only plain data delays qualify: registered-done control
/// stages carry per-cycle meaning and stay as individual flops.
pub fn compact_shift_registers(design: &mut Design) -> SilicaResult<usize> {
    // Who consumes each bus, so single-consumer links can be identified.
    let mut consumers: HashMap<BusIdx, Vec<PortIdx>> = HashMap::new();
    for (port, p) in design.ports.iter() {
        if let Some(bus) = p.driver {
            consumers.entry(bus).or_default().push(port);
        }
    }

    let is_chain_reg = |design: &Design, comp: CompIdx| {
        matches!(
            design.components[comp].kind,
            ComponentKind::Reg {
                mode: RegMode::Simple,
                sync_done: false,
            }
        ) && !design.components[comp].retired
    };

    // The single chainable successor of a register, if any.
    let next_in_chain = |design: &Design, comp: CompIdx| {
        let result = design.result_bus(comp).ok()?;
        match consumers.get(&result).map(Vec::as_slice) {
            Some([port]) => {
                let owner = design.ports[*port].owner;
                (is_chain_reg(design, owner)
                    && design.components[owner].data_ports().first()
                        == Some(port))
                .then_some(owner)
            }
            _ => None,
        }
    };

    let mut compacted = 0;
    let comps: Vec<_> = design.components.keys().collect();
    for head in comps {
        if !is_chain_reg(design, head) {
            continue;
        }
        // Only start at chain heads: a register fed by another chain
        // register is interior.
        let fed_by_chain = design.components[head]
            .data_ports()
            .first()
            .and_then(|&p| design.ports[p].driver)
            .map(|bus| {
                is_chain_reg(design, design.bus_owner(bus))
                    && next_in_chain(design, design.bus_owner(bus))
                        == Some(head)
            })
            .unwrap_or(false);
        if fed_by_chain {
            continue;
        }

        let mut chain = vec![head];
        while let Some(next) =
            next_in_chain(design, *chain.last().unwrap_or(&head))
        {
            chain.push(next);
        }
        if chain.len() < MIN_CHAIN {
            continue;
        }

        compact_chain(design, &chain)?;
        compacted += 1;
    }
    if compacted > 0 {
        log::info!("compacted {compacted} register chains");
    }
    Ok(compacted)
}

fn compact_chain(
    design: &mut Design,
    chain: &[CompIdx],
) -> SilicaResult<()> {
    let head = chain[0];
    let tail = *chain.last().unwrap_or(&head);
    let input = design.components[head]
        .data_ports()
        .first()
        .and_then(|&p| design.ports[p].driver);
    let tail_result = design.result_bus(tail)?;
    let module = design.components[head].owner;

    let mut builder = Builder::new(design);
    let sr = builder.add_component(
        "srl",
        ComponentKind::ShiftReg {
            depth: chain.len() as u32,
        },
        1,
        1,
    );
    if let Some(module) = module {
        design.add_to_module(sr, module);
    }
    if let Some(input) = input {
        let in_port = design.components[sr].data_ports()[0];
        design.connect(in_port, input);
    }
    let sr_result = design.result_bus(sr)?;
    design.buses[sr_result].value = design.buses[tail_result].value;

    // Steal the tail's consumers, then retire the whole chain.
    let ports: Vec<_> = design.ports.keys().collect();
    for port in ports {
        if design.ports[port].driver == Some(tail_result) {
            design.connect(port, sr_result);
        }
    }
    for &reg in chain {
        design.components[reg].retired = true;
    }
    Ok(())
}

/// Mark registers that sit directly on a pin boundary for placement in
/// I/O block flops, which shortens the pad-to-logic path.
pub fn insert_iob_registers(design: &mut Design) {
    let mut marked = 0;
    for idx in design.components.keys().collect::<Vec<_>>() {
        let pin_write = matches!(
            design.components[idx].kind,
            ComponentKind::PinWrite { .. }
        );
        if !pin_write || design.components[idx].retired {
            continue;
        }
        // The register feeding a pin writer's data port belongs in the
        // I/O block.
        let driver = design.components[idx]
            .data_ports()
            .first()
            .and_then(|&p| design.ports[p].driver);
        if let Some(bus) = driver {
            let owner = design.bus_owner(bus);
            if matches!(
                design.components[owner].kind,
                ComponentKind::Reg { .. }
            ) {
                design.components[owner].iob = true;
                marked += 1;
            }
        }
    }
    if marked > 0 {
        log::info!("marked {marked} registers for I/O block placement");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silica_ir::{Builder, Dependency, OpKind};

    fn simple_reg(builder: &mut Builder, module: CompIdx) -> CompIdx {
        let reg = builder.add_component(
            "d",
            ComponentKind::Reg {
                mode: RegMode::Simple,
                sync_done: false,
            },
            1,
            1,
        );
        builder.design.add_to_module(reg, module);
        reg
    }

    #[test]
    fn long_register_chains_become_shift_registers() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        let src = builder.add_component(
            "src",
            ComponentKind::Constant { value: 7 },
            0,
            1,
        );
        builder.design.add_to_module(src, task);
        let sink = builder.add_component(
            "sink",
            ComponentKind::Reg {
                mode: RegMode::Enable,
                sync_done: false,
            },
            1,
            1,
        );
        builder.design.add_to_module(sink, task);

        let mut prev = design.result_bus(src).unwrap();
        let mut regs = Vec::new();
        for _ in 0..4 {
            let mut builder = Builder::new(&mut design);
            let reg = simple_reg(&mut builder, task);
            let port = design.components[reg].data_ports()[0];
            design.connect(port, prev);
            prev = design.result_bus(reg).unwrap();
            regs.push(reg);
        }
        let sink_port = design.components[sink].data_ports()[0];
        design.connect(sink_port, prev);

        assert_eq!(compact_shift_registers(&mut design).unwrap(), 1);
        for reg in regs {
            assert!(design.components[reg].retired);
        }
        let driver = design.ports[sink_port].driver.unwrap();
        let owner = design.bus_owner(driver);
        assert!(matches!(
            design.components[owner].kind,
            ComponentKind::ShiftReg { depth: 4 }
        ));
    }

    #[test]
    fn short_chains_stay_as_flops() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        let src = builder.add_component(
            "src",
            ComponentKind::Constant { value: 7 },
            0,
            1,
        );
        builder.design.add_to_module(src, task);
        let r1 = simple_reg(&mut builder, task);
        let r2 = simple_reg(&mut builder, task);
        let src_out = design.result_bus(src).unwrap();
        let p1 = design.components[r1].data_ports()[0];
        design.connect(p1, src_out);
        let r1_out = design.result_bus(r1).unwrap();
        let p2 = design.components[r2].data_ports()[0];
        design.connect(p2, r1_out);

        assert_eq!(compact_shift_registers(&mut design).unwrap(), 0);
        assert!(!design.components[r1].retired);
    }

    /// Four chained adders with a depth limit of two: the third crosses
    /// the limit and gets its result registered.
    #[test]
    fn deep_operator_chains_get_registered() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        let mut adders = Vec::new();
        for i in 0..4 {
            let add = builder.add_component(
                format!("a{i}"),
                ComponentKind::Op(OpKind::Add),
                1,
                1,
            );
            builder.design.add_to_module(add, task);
            adders.push(add);
        }
        builder.add_task(task);
        for pair in adders.windows(2) {
            let result = design.result_bus(pair[0]).unwrap();
            let port = design.components[pair[1]].data_ports()[0];
            let entry = design.add_entry(pair[1]);
            design.entries[entry]
                .add_dependency(port, Dependency::data(result));
        }

        assert_eq!(pipeline_operations(&mut design, 2).unwrap(), 1);
        let exit = design.done_exit(adders[2]).unwrap();
        assert_eq!(design.exits[exit].latency, Latency::ONE);
        // The chain restarts after the registered point.
        let exit = design.done_exit(adders[3]).unwrap();
        assert_eq!(design.exits[exit].latency, Latency::ZERO);
    }

    /// A task whose output buffer fires combinationally gets a delay
    /// register spliced into its completion after scheduling.
    #[test]
    fn combinational_tasks_get_a_registered_done() {
        let mut design = Design::new();
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        builder.add_task(task);
        let start = design.inbuf_done_bus(task).unwrap();
        let outbuf =
            design.components[task].module_data().unwrap().outbuf;
        let go = design.components[outbuf].go_port();
        let entry = design.add_entry(outbuf);
        design.entries[entry]
            .add_dependency(go, Dependency::control(start));

        let mut tracker =
            crate::passes::schedule::schedule_design(&mut design, false)
                .unwrap();
        adjust_task_depth(&mut design, &mut tracker).unwrap();

        let exit = design.done_exit(task).unwrap();
        assert_eq!(design.exits[exit].latency, Latency::fixed(1));
        let driver = design.ports[go].driver.unwrap();
        assert!(matches!(
            design.components[design.bus_owner(driver)].kind,
            ComponentKind::Reg {
                mode: RegMode::Simple,
                sync_done: true,
            }
        ));
    }
}
