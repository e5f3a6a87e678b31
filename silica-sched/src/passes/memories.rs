//! Global memory handling: access resolution, pruning, implementation
//! selection, port allocation, and referee construction.
use silica_idx::IndexRef;
use silica_ir::{
    Builder, ComponentKind, Design, Latency, MemImpl,
};
use silica_utils::SilicaResult;

use crate::analysis::LatencyTracker;

/// Rebuild the access lists of every memory, FIFO, pin, and global
/// register from the components that actually reference them. The front
/// end's lists go stale as passes clone and retire components; this pass
/// is the single source of truth afterwards.
pub fn resolve_accesses(design: &mut Design) {
    for mem in design.memories.values_mut() {
        mem.accesses.clear();
    }
    for fifo in design.fifos.values_mut() {
        fifo.accesses.clear();
    }
    for pin in design.pins.values_mut() {
        pin.accesses.clear();
    }
    for reg in design.registers.values_mut() {
        reg.accesses.clear();
    }
    for (idx, comp) in design.components.iter() {
        if comp.retired {
            continue;
        }
        match comp.kind {
            ComponentKind::MemRead { mem }
            | ComponentKind::MemWrite { mem } => {
                design.memories[mem].accesses.push(idx)
            }
            ComponentKind::FifoRead { fifo }
            | ComponentKind::FifoWrite { fifo } => {
                design.fifos[fifo].accesses.push(idx)
            }
            ComponentKind::PinRead { pin }
            | ComponentKind::PinWrite { pin } => {
                design.pins[pin].accesses.push(idx)
            }
            ComponentKind::RegRead { reg }
            | ComponentKind::RegWrite { reg } => {
                design.registers[reg].accesses.push(idx)
            }
            _ => {}
        }
    }
}

/// Characterize the access mix of each global resource. Emission and
/// implementation selection both read these counts.
pub fn count_accesses(design: &mut Design) {
    let mut mem_counts = vec![(0u32, 0u32); design.memories.len()];
    let mut fifo_counts = vec![(0u32, 0u32); design.fifos.len()];
    let mut reg_counts = vec![(0u32, 0u32); design.registers.len()];
    for (_, comp) in design.components.iter() {
        if comp.retired {
            continue;
        }
        match comp.kind {
            ComponentKind::MemRead { mem } => {
                mem_counts[mem.index()].0 += 1
            }
            ComponentKind::MemWrite { mem } => {
                mem_counts[mem.index()].1 += 1
            }
            ComponentKind::FifoRead { fifo } => {
                fifo_counts[fifo.index()].0 += 1
            }
            ComponentKind::FifoWrite { fifo } => {
                fifo_counts[fifo.index()].1 += 1
            }
            ComponentKind::RegRead { reg } => {
                reg_counts[reg.index()].0 += 1
            }
            ComponentKind::RegWrite { reg } => {
                reg_counts[reg.index()].1 += 1
            }
            _ => {}
        }
    }
    for (idx, mem) in design.memories.iter_mut() {
        (mem.reads, mem.writes) = mem_counts[idx.index()];
    }
    for (idx, fifo) in design.fifos.iter_mut() {
        (fifo.reads, fifo.writes) = fifo_counts[idx.index()];
    }
    for (idx, reg) in design.registers.iter_mut() {
        (reg.reads, reg.writes) = reg_counts[idx.index()];
    }
}

/// Mark memories nothing accesses as dead so no hardware is built for
/// them.
pub fn prune_dead_memories(design: &mut Design) {
    let mut pruned = 0;
    for mem in design.memories.values_mut() {
        if mem.accesses.is_empty() && mem.live {
            mem.live = false;
            pruned += 1;
        }
    }
    if pruned > 0 {
        log::info!("pruned {pruned} unreferenced memories");
    }
}

/// Below this many bits of storage, LUT RAM beats a block RAM.
const BLOCK_RAM_THRESHOLD_BITS: u64 = 512;

/// Pick an implementation for every live memory that does not have one.
/// Small memories become LUT RAM with a combinational read; larger ones
/// become block RAM, which registers the read and costs a cycle on every
/// read access.
pub fn select_implementations(design: &mut Design, allow_block_ram: bool) {
    let mut reads_to_retime = Vec::new();
    for (idx, mem) in design.memories.iter_mut() {
        if !mem.live {
            continue;
        }
        let bits = u64::from(mem.depth) * u64::from(mem.width);
        let chosen = if bits >= BLOCK_RAM_THRESHOLD_BITS {
            if allow_block_ram {
                MemImpl::BlockRam
            } else {
                log::warn!(
                    "memory {} wants block RAM ({} bits) but block RAM \
                     is disabled; using LUT RAM",
                    mem.name,
                    bits
                );
                MemImpl::LutRam
            }
        } else {
            MemImpl::LutRam
        };
        if mem.implementation.is_none() {
            mem.implementation = Some(chosen);
            if chosen == MemImpl::BlockRam {
                reads_to_retime.push(idx);
            }
        }
    }
    // Block RAM reads take a cycle; their access components need to say
    // so before scheduling reasons about them.
    for idx in reads_to_retime {
        for access in design.memories[idx].accesses.clone() {
            if matches!(
                design.components[access].kind,
                ComponentKind::MemRead { .. }
            ) {
                if let Some(exit) = design.done_exit(access) {
                    design.exits[exit].latency = Latency::ONE;
                }
            }
        }
    }
}

/// Give a second physical port to memories whose accesses span more than
/// one task, so the tasks need not arbitrate against each other.
pub fn allocate_dual_port(design: &mut Design) {
    for idx in design.memories.keys().collect::<Vec<_>>() {
        if !design.memories[idx].live {
            continue;
        }
        let mut owners: Vec<_> = design.memories[idx]
            .accesses
            .iter()
            .map(|&a| task_of(design, a))
            .collect();
        owners.sort();
        owners.dedup();
        if owners.len() > 1 {
            design.memories[idx].dual_port = true;
        }
    }
}

fn task_of(
    design: &Design,
    comp: silica_ir::CompIdx,
) -> Option<silica_ir::CompIdx> {
    design.owner_path(comp).first().copied()
}

/// Build the arbitration referee for every live memory and accessed
/// global register. The referee lives at design level, with one data port
/// per access; the ports are wired after scheduling, when every access
/// has a meaningful done.
pub fn build_referees(design: &mut Design) -> SilicaResult<()> {
    for idx in design.memories.keys().collect::<Vec<_>>() {
        if !design.memories[idx].live
            || design.memories[idx].referee.is_some()
        {
            continue;
        }
        let n = design.memories[idx].accesses.len();
        let name = format!("{}_referee", design.memories[idx].name);
        let mut builder = Builder::new(design);
        let referee =
            builder.add_component(name, ComponentKind::Referee, n, 1);
        design.globals.push(referee);
        design.memories[idx].referee = Some(referee);
    }
    for idx in design.registers.keys().collect::<Vec<_>>() {
        if design.registers[idx].accesses.is_empty()
            || design.registers[idx].referee.is_some()
        {
            continue;
        }
        let n = design.registers[idx].accesses.len();
        let name = format!("{}_referee", design.registers[idx].name);
        let mut builder = Builder::new(design);
        let referee =
            builder.add_component(name, ComponentKind::Referee, n, 1);
        design.globals.push(referee);
        design.registers[idx].referee = Some(referee);
    }
    Ok(())
}

/// Post-scheduling: wire each referee's ports to the done buses of the
/// accesses it arbitrates. Accesses the tracker never saw are an internal
/// inconsistency upstream, but here they simply stay unwired and the
/// final connection check reports them.
pub fn connect_globals(
    design: &mut Design,
    _tracker: &LatencyTracker,
) -> SilicaResult<()> {
    let mems: Vec<_> = design.memories.keys().collect();
    for idx in mems {
        if let Some(referee) = design.memories[idx].referee {
            let accesses = design.memories[idx].accesses.clone();
            wire_referee(design, referee, &accesses);
        }
    }
    let regs: Vec<_> = design.registers.keys().collect();
    for idx in regs {
        if let Some(referee) = design.registers[idx].referee {
            let accesses = design.registers[idx].accesses.clone();
            wire_referee(design, referee, &accesses);
        }
    }
    Ok(())
}

fn wire_referee(
    design: &mut Design,
    referee: silica_ir::CompIdx,
    accesses: &[silica_ir::CompIdx],
) {
    let ports = design.components[referee].data_ports().to_vec();
    for (port, &access) in ports.into_iter().zip(accesses) {
        if let Some(done) = design.done_bus(access) {
            design.connect(port, done);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silica_ir::{Builder, Design, Memory};

    fn memory(design: &mut Design, depth: u32, width: u32) -> silica_ir::MemIdx {
        design.memories.push(Memory {
            name: "mem".into(),
            depth,
            width,
            accesses: Vec::new(),
            implementation: None,
            dual_port: false,
            referee: None,
            live: true,
            reads: 0,
            writes: 0,
        })
    }

    #[test]
    fn accessless_memories_are_pruned() {
        let mut design = Design::new();
        let mem = memory(&mut design, 64, 32);
        resolve_accesses(&mut design);
        prune_dead_memories(&mut design);
        assert!(!design.memories[mem].live);
    }

    #[test]
    fn implementation_follows_storage_size() {
        let mut design = Design::new();
        let small = memory(&mut design, 8, 8);
        let large = memory(&mut design, 1024, 32);
        select_implementations(&mut design, true);
        assert_eq!(
            design.memories[small].implementation,
            Some(MemImpl::LutRam)
        );
        assert_eq!(
            design.memories[large].implementation,
            Some(MemImpl::BlockRam)
        );

        let mut design = Design::new();
        let large = memory(&mut design, 1024, 32);
        select_implementations(&mut design, false);
        assert_eq!(
            design.memories[large].implementation,
            Some(MemImpl::LutRam)
        );
    }

    #[test]
    fn block_ram_reads_gain_a_cycle() {
        let mut design = Design::new();
        let mem = memory(&mut design, 1024, 32);
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        let rd = builder.add_component(
            "rd",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        builder.design.add_to_module(rd, task);
        resolve_accesses(&mut design);
        select_implementations(&mut design, true);
        let exit = design.done_exit(rd).unwrap();
        assert_eq!(design.exits[exit].latency, Latency::ONE);
    }

    #[test]
    fn referees_get_one_port_per_access() {
        let mut design = Design::new();
        let mem = memory(&mut design, 64, 8);
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        for _ in 0..3 {
            let a = builder.add_component(
                "wr",
                ComponentKind::MemWrite { mem },
                2,
                0,
            );
            builder.design.add_to_module(a, task);
        }
        resolve_accesses(&mut design);
        build_referees(&mut design).unwrap();
        let referee = design.memories[mem].referee.unwrap();
        assert_eq!(design.components[referee].data_ports().len(), 3);
        assert!(design.globals.contains(&referee));
    }
}
