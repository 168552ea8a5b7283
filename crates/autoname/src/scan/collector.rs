use super::decoder::StoreScan;

/// Names extracted from one [`StoreScan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    /// Last simple or chained target of the value itself.
    pub name: Option<String>,
    /// Per pattern position of the last destructuring group, the identifier
    /// bound there. `None` inside means the position was a nested pattern.
    pub group: Option<Vec<Option<String>>>,
}

/// Applies the naming rules to decoded stores.
///
/// Events inside unpack groups are set aside first. Among the remaining events
/// the last one wins, matching `a = b = X()` binding `b` last. When several
/// groups were opened the last one supplies the sibling names.
#[must_use]
pub fn collect(scan: &StoreScan) -> Collected {
    let name = scan.residual().last().map(|event| event.name.clone());
    let group = scan.groups.last().map(|group| {
        group
            .targets
            .iter()
            .map(|target| target.map(|index| scan.events[index].name.clone()))
            .collect()
    });
    Collected { name, group }
}
