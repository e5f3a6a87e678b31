//! Pre-scheduling sanity check: every port the design intends to use must
//! be reachable through some entry's dependencies, or scheduling would
//! silently leave it dangling.
use silica_ir::{CompIdx, Design, PortIdx};
use silica_utils::{Error, SilicaResult};

/// Check every used, undriven port of every module child for a
/// dependency. The first offender aborts the run; a dangling port is a
/// front-end bug, not something scheduling can paper over.
pub fn check_dependencies(design: &Design) -> SilicaResult<()> {
    for (comp, component) in design.components.iter() {
        if component.owner.is_none() || component.retired {
            continue;
        }
        for &port in component.ports.iter() {
            if !design.ports[port].used
                || design.ports[port].driver.is_some()
            {
                continue;
            }
            if !has_dependency(design, comp, port) {
                return Err(Error::internal(format!(
                    "port {} of {} is used but has no dependency",
                    design.ports[port].name,
                    design.describe(comp)
                )));
            }
        }
    }
    Ok(())
}

fn has_dependency(design: &Design, comp: CompIdx, port: PortIdx) -> bool {
    design.components[comp].entries.iter().any(|&entry| {
        design.entries[entry].deps_on(port).next().is_some()
    })
}
