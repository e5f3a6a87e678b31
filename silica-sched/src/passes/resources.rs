//! Sequencing of accesses to shared resources.
//!
//! Two accesses to the same memory, FIFO, pin, or global register must not
//! reorder when at least one of them writes. This pass walks every module
//! in program order and inserts resource dependencies between conflicting
//! accesses, treating a nested module as a unit that uses everything its
//! descendants use. Reads commute, so read-read pairs get no edge.
use std::collections::{BTreeSet, HashMap};

use silica_ir::{
    CompIdx, ComponentKind, Dependency, Design, Resource,
};
use silica_utils::{Error, SilicaResult};

pub fn sequence_resources(design: &mut Design) -> SilicaResult<usize> {
    let mut uses = HashMap::new();
    let mut inserted = 0;
    for task in design.tasks.clone() {
        sequence_module(design, task, &mut uses, &mut inserted)?;
    }
    if inserted > 0 {
        log::info!("inserted {inserted} resource sequencing edges");
    }
    Ok(inserted)
}

/// Reads and writes a component performs, directly or through its
/// descendants.
#[derive(Clone, Default)]
struct Uses {
    reads: BTreeSet<Resource>,
    writes: BTreeSet<Resource>,
}

impl Uses {
    /// One of the pair must write a resource the other touches.
    fn conflicts_with(&self, other: &Uses) -> bool {
        let writes_meet_other = self.writes.iter().any(|r| {
            other.reads.contains(r) || other.writes.contains(r)
        });
        writes_meet_other
            || other.writes.iter().any(|r| self.reads.contains(r))
    }
}

fn sequence_module(
    design: &mut Design,
    module: CompIdx,
    uses: &mut HashMap<CompIdx, Uses>,
    inserted: &mut usize,
) -> SilicaResult<()> {
    let children = match design.components[module].module_data() {
        Some(data) => data.components.clone(),
        None => return Ok(()),
    };
    // Depth first, so every child's use set exists before this level is
    // sequenced.
    for &comp in &children {
        if design.components[comp].is_module() {
            sequence_module(design, comp, uses, inserted)?;
        }
        let use_set = collect_uses(design, comp, uses);
        uses.insert(comp, use_set);
    }

    let mut earlier: Vec<CompIdx> = Vec::new();
    for &comp in &children {
        if design.components[comp].retired {
            continue;
        }
        let current = uses.get(&comp).cloned().unwrap_or_default();
        if current.reads.is_empty() && current.writes.is_empty() {
            continue;
        }
        for &prev in &earlier {
            let prev_uses =
                uses.get(&prev).cloned().unwrap_or_default();
            if current.conflicts_with(&prev_uses) {
                add_sequencing_edge(design, prev, comp)?;
                *inserted += 1;
            }
        }
        earlier.push(comp);
    }
    Ok(())
}

fn collect_uses(
    design: &Design,
    comp: CompIdx,
    child_uses: &HashMap<CompIdx, Uses>,
) -> Uses {
    let mut uses = Uses::default();
    match design.components[comp].kind {
        ComponentKind::MemRead { mem } => {
            uses.reads.insert(Resource::Memory(mem));
        }
        ComponentKind::MemWrite { mem } => {
            uses.writes.insert(Resource::Memory(mem));
        }
        // FIFO operations are destructive in both directions.
        ComponentKind::FifoRead { fifo }
        | ComponentKind::FifoWrite { fifo } => {
            uses.writes.insert(Resource::Fifo(fifo));
        }
        ComponentKind::PinRead { pin } => {
            uses.reads.insert(Resource::Pin(pin));
        }
        ComponentKind::PinWrite { pin } => {
            uses.writes.insert(Resource::Pin(pin));
        }
        ComponentKind::RegRead { reg } => {
            uses.reads.insert(Resource::Register(reg));
        }
        ComponentKind::RegWrite { reg } => {
            uses.writes.insert(Resource::Register(reg));
        }
        _ => {}
    }
    if let Some(data) = design.components[comp].module_data() {
        for &child in &data.components {
            if let Some(child_set) = child_uses.get(&child) {
                uses.reads.extend(child_set.reads.iter().copied());
                uses.writes.extend(child_set.writes.iter().copied());
            }
        }
    }
    uses
}

/// Make `later` wait for `earlier`'s completion.
fn add_sequencing_edge(
    design: &mut Design,
    earlier: CompIdx,
    later: CompIdx,
) -> SilicaResult<()> {
    let done = design.done_bus(earlier).ok_or_else(|| {
        Error::internal(format!(
            "sequencing against {} which has no done bus",
            design.describe(earlier)
        ))
    })?;
    let go = design.components[later].go_port();
    let entry = match design.components[later].entries.first() {
        Some(&e) => e,
        None => design.add_entry(later),
    };
    design.entries[entry]
        .add_dependency(go, Dependency::resource(done, 0));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::sequence_resources;
    use silica_ir::{
        Builder, ComponentKind, DepKind, Design, Memory,
    };

    #[test]
    fn writes_serialize_against_reads_but_reads_commute() {
        let mut design = Design::new();
        let mem = design.memories.push(Memory {
            name: "mem".into(),
            depth: 16,
            width: 8,
            accesses: Vec::new(),
            implementation: None,
            dual_port: false,
            referee: None,
            live: true,
            reads: 0,
            writes: 0,
        });
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        let r1 = builder.add_component(
            "r1",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        let r2 = builder.add_component(
            "r2",
            ComponentKind::MemRead { mem },
            1,
            1,
        );
        let w = builder.add_component(
            "w",
            ComponentKind::MemWrite { mem },
            2,
            0,
        );
        for comp in [r1, r2, w] {
            builder.design.add_to_module(comp, task);
        }
        builder.add_task(task);

        let inserted = sequence_resources(&mut design).unwrap();
        // write-after-read from both reads; nothing between the reads.
        assert_eq!(inserted, 2);
        let resource_deps = |comp: silica_ir::CompIdx| {
            design.components[comp]
                .entries
                .iter()
                .flat_map(|&e| design.entries[e].deps.iter())
                .filter(|(_, d)| d.kind == DepKind::Resource)
                .count()
        };
        assert_eq!(resource_deps(r1), 0);
        assert_eq!(resource_deps(r2), 0);
        assert_eq!(resource_deps(w), 2);
    }
}
