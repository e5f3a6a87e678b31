//! End-to-end runs of the full scheduling pipeline.
use silica_ir::{
    Builder, ComponentKind, Dependency, Design, Memory, RegMode,
};
use silica_sched::{Scheduler, SchedulerConf};

/// A task that loads a constant into a register and writes a memory, with
/// completion gated on both.
fn build_design() -> Design {
    let mut design = Design::new();
    let mem = design.memories.push(Memory {
        name: "scratch".into(),
        depth: 256,
        width: 16,
        accesses: Vec::new(),
        implementation: None,
        dual_port: false,
        referee: None,
        live: true,
        reads: 0,
        writes: 0,
    });

    let mut builder = Builder::new(&mut design);
    let task = builder.add_block("main", 0, 0);
    let c = builder.add_component(
        "answer",
        ComponentKind::Constant { value: 42 },
        0,
        1,
    );
    let sink = builder.add_component(
        "acc",
        ComponentKind::Reg {
            mode: RegMode::Enable,
            sync_done: true,
        },
        1,
        1,
    );
    let wr = builder.add_component(
        "store",
        ComponentKind::MemWrite { mem },
        2,
        0,
    );
    for comp in [c, sink, wr] {
        builder.design.add_to_module(comp, task);
    }
    builder.add_task(task);

    let start = design.inbuf_done_bus(task).unwrap();
    let value = design.result_bus(c).unwrap();

    let sink_go = design.components[sink].go_port();
    let sink_in = design.components[sink].data_ports()[0];
    let entry = design.add_entry(sink);
    design.entries[entry].add_dependency(sink_go, Dependency::control(start));
    design.entries[entry].add_dependency(sink_in, Dependency::data(value));

    let wr_go = design.components[wr].go_port();
    let wr_data = design.components[wr].data_ports()[1];
    let entry = design.add_entry(wr);
    design.entries[entry].add_dependency(wr_go, Dependency::control(start));
    design.entries[entry].add_dependency(wr_data, Dependency::data(value));

    let outbuf = design.components[task].module_data().unwrap().outbuf;
    let ob_go = design.components[outbuf].go_port();
    let entry = design.add_entry(outbuf);
    for done in [design.done_bus(sink).unwrap(), design.done_bus(wr).unwrap()]
    {
        design.entries[entry].add_dependency(ob_go, Dependency::control(done));
    }
    design
}

#[test]
fn full_pipeline_schedules_and_verifies() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut design = build_design();
    let scheduler = Scheduler::new(SchedulerConf::default());
    scheduler.schedule(&mut design).unwrap();

    // Both completion paths are one registered cycle; they tie and merge
    // into a single control, and the task finishes in one cycle.
    let task = design.tasks[0];
    let exit = design.done_exit(task).unwrap();
    assert_eq!(
        design.exits[exit].latency,
        silica_ir::Latency::fixed(1)
    );

    // The memory got a referee wired to its single access.
    let mem = design.memories.keys().next().unwrap();
    let referee = design.memories[mem].referee.unwrap();
    let port = design.components[referee].data_ports()[0];
    assert!(design.ports[port].driver.is_some());
}

/// Balanced mode pads controls instead of latching data, but a design
/// whose completion paths already agree schedules to the same latency.
#[test]
fn balanced_scheduling_matches_unbalanced_latency() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut design = build_design();
    let conf = SchedulerConf {
        balance: true,
        ..SchedulerConf::default()
    };
    Scheduler::new(conf).schedule(&mut design).unwrap();

    let task = design.tasks[0];
    let exit = design.done_exit(task).unwrap();
    assert_eq!(
        design.exits[exit].latency,
        silica_ir::Latency::fixed(1)
    );
}

#[test]
fn scheduling_is_deterministic() {
    let schedule = || {
        let mut design = build_design();
        Scheduler::new(SchedulerConf::default())
            .schedule(&mut design)
            .unwrap();
        design
            .components
            .iter()
            .map(|(_, c)| (c.name.to_string(), c.retired))
            .collect::<Vec<_>>()
    };
    assert_eq!(schedule(), schedule());
}
