//! Forward width and signedness propagation.
//!
//! Runs before scheduling so that every register, latch, and mux inserted
//! later can size itself off its input bus. The pass walks each module in
//! dataflow order, mirroring dependency bus values onto ports and deriving
//! result values per component kind. Two sweeps over the task list let
//! values cross module boundaries in both directions.
use silica_ir::{
    BusValue, CompIdx, ComponentKind, Design, OpKind,
};
use silica_utils::{bits_needed_for, SilicaResult};

use crate::analysis::dataflow_order;

pub fn propagate_widths(design: &mut Design) -> SilicaResult<()> {
    for _ in 0..2 {
        for task in design.tasks.clone() {
            propagate_module(design, task)?;
        }
    }
    Ok(())
}

fn propagate_module(
    design: &mut Design,
    module: CompIdx,
) -> SilicaResult<()> {
    for comp in dataflow_order(design, module)? {
        if design.components[comp].retired {
            continue;
        }
        mirror_port_values(design, comp);
        if design.components[comp].is_module() {
            seed_inbuf(design, comp);
            propagate_module(design, comp)?;
            read_outbuf(design, comp)?;
        } else {
            derive_results(design, comp)?;
        }
    }
    Ok(())
}

/// Copy each port's value from its driver, or from the first dependency
/// naming it when nothing is connected yet.
fn mirror_port_values(design: &mut Design, comp: CompIdx) {
    let ports = design.components[comp].ports.clone();
    for port in ports {
        if design.ports[port].value.is_some() {
            continue;
        }
        let bus = design.ports[port].driver.or_else(|| {
            design.components[comp].entries.iter().find_map(|&entry| {
                design.entries[entry]
                    .deps_on(port)
                    .next()
                    .map(|dep| dep.bus)
            })
        });
        if let Some(bus) = bus {
            design.ports[port].value = design.buses[bus].value;
        }
    }
}

/// Image the module's data port values onto its input buffer's buses.
fn seed_inbuf(design: &mut Design, module: CompIdx) {
    let Some(data) = design.components[module].module_data() else {
        return;
    };
    let inbuf = data.inbuf;
    let ports = design.components[module].data_ports().to_vec();
    if let Some(exit) = design.done_exit(inbuf) {
        let buses = design.exits[exit].data_buses.clone();
        for (port, bus) in ports.into_iter().zip(buses) {
            if design.buses[bus].value.is_none() {
                design.buses[bus].value = design.ports[port].value;
            }
        }
    }
}

/// Image the output buffer's port values onto the module's result buses.
fn read_outbuf(design: &mut Design, module: CompIdx) -> SilicaResult<()> {
    let Some(data) = design.components[module].module_data() else {
        return Ok(());
    };
    let outbuf = data.outbuf;
    let ports = design.components[outbuf].data_ports().to_vec();
    if let Some(exit) = design.done_exit(module) {
        let buses = design.exits[exit].data_buses.clone();
        for (port, bus) in ports.into_iter().zip(buses) {
            if design.buses[bus].value.is_none() {
                design.buses[bus].value = design.ports[port].value;
            }
        }
    }
    Ok(())
}

fn derive_results(design: &mut Design, comp: CompIdx) -> SilicaResult<()> {
    let inputs: Vec<BusValue> = design.components[comp]
        .data_ports()
        .iter()
        .filter_map(|&p| design.ports[p].value)
        .collect();
    let widest = inputs.iter().map(|v| v.width).max();
    let signed = inputs.iter().any(|v| v.signed);

    let value = match &design.components[comp].kind {
        ComponentKind::Constant { value } => Some(BusValue::unsigned(
            bits_needed_for((*value).max(1)) as u32,
        )),
        ComponentKind::And
        | ComponentKind::Or
        | ComponentKind::Scoreboard
        | ComponentKind::Stallboard
        | ComponentKind::Op(OpKind::Compare) => Some(BusValue::control()),
        ComponentKind::Reg { .. }
        | ComponentKind::Latch
        | ComponentKind::Mux
        | ComponentKind::ShiftReg { .. }
        | ComponentKind::Op(_) => {
            widest.map(|width| BusValue { width, signed })
        }
        ComponentKind::MemRead { mem } => {
            Some(BusValue::unsigned(design.memories[*mem].width))
        }
        ComponentKind::RegRead { reg } => {
            Some(BusValue::unsigned(design.registers[*reg].width))
        }
        ComponentKind::PinRead { pin } => {
            Some(BusValue::unsigned(design.pins[*pin].width))
        }
        _ => None,
    };
    if let Some(value) = value {
        if let Ok(result) = design.result_bus(comp) {
            if design.buses[result].value.is_none() {
                design.buses[result].value = Some(value);
            }
        }
    }
    Ok(())
}
