//! Pin access optimization.
use silica_ir::{ComponentKind, Design};

/// A pin with exactly one writer needs no arbitration and no go
/// qualification: its output can track the writer's input combinationally,
/// and the pin simply carries whatever the writer last presented.
pub fn optimize_pin_writes(design: &mut Design) {
    for idx in design.pins.keys().collect::<Vec<_>>() {
        let writers: Vec<_> = design.pins[idx]
            .accesses
            .iter()
            .copied()
            .filter(|&a| {
                matches!(
                    design.components[a].kind,
                    ComponentKind::PinWrite { .. }
                )
            })
            .collect();
        if let [writer] = writers[..] {
            design.pins[idx].tracks_unqualified = true;
            design.components[writer].consumes_go = false;
            log::debug!(
                "pin {} tracks its single writer unqualified",
                design.pins[idx].name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::optimize_pin_writes;
    use silica_ir::{Builder, ComponentKind, Design, Pin};

    fn pin(design: &mut Design) -> silica_ir::PinIdx {
        design.pins.push(Pin {
            name: "pin".into(),
            width: 8,
            accesses: Vec::new(),
            tracks_unqualified: false,
        })
    }

    #[test]
    fn single_writer_pins_drop_go_qualification() {
        let mut design = Design::new();
        let single = pin(&mut design);
        let shared = pin(&mut design);
        let mut builder = Builder::new(&mut design);
        let task = builder.add_block("task", 0, 0);
        let w = builder.add_component(
            "w",
            ComponentKind::PinWrite { pin: single },
            1,
            0,
        );
        let w1 = builder.add_component(
            "w1",
            ComponentKind::PinWrite { pin: shared },
            1,
            0,
        );
        let w2 = builder.add_component(
            "w2",
            ComponentKind::PinWrite { pin: shared },
            1,
            0,
        );
        for comp in [w, w1, w2] {
            builder.design.add_to_module(comp, task);
        }
        design.pins[single].accesses.push(w);
        design.pins[shared].accesses.extend([w1, w2]);

        optimize_pin_writes(&mut design);
        assert!(design.pins[single].tracks_unqualified);
        assert!(!design.components[w].consumes_go);
        assert!(!design.pins[shared].tracks_unqualified);
        assert!(design.components[w1].consumes_go);
    }
}
