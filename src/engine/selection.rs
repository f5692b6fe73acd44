//! Parameter selection from command-line filters

use anyhow::Result;
use reconcile::Parameter;

use crate::cli::SelectArgs;
use crate::registry::Registry;

/// Parameters matching every given filter, in registry order
///
/// Each `--param` id must exist in the registry; an unknown id fails the
/// command before anything is read. Category and id filters intersect.
pub fn select<'a>(registry: &'a Registry, filter: &SelectArgs) -> Result<Vec<&'a Parameter>> {
    for id in &filter.params {
        registry.get(id)?;
    }

    let selected: Vec<&Parameter> = registry
        .list_parameters(&filter.categories)
        .into_iter()
        .filter(|p| filter.params.is_empty() || filter.params.contains(&p.id))
        .collect();

    log::debug!(
        "Selected {} of {} parameters",
        selected.len(),
        registry.len()
    );
    Ok(selected)
}
