//! Merging of rows that decode to an entity already produced.
//!
//! Fan-out rows (an element collection in the resource path, a join repeating the owner)
//! carry the same scalar values and differ only in collection content:
//! * primitive collection values are added if not yet present;
//! * complex collection entries are appended if no equal entry exists;
//! * single complex values merge recursively;
//! * navigation links must agree in title and inline count.

use crate::error::{MessageKey, ProcessorError, Result};
use odata_core::{ComplexValue, Entity, Link, Property, PropertyValue};

pub fn merge_entity(existing: &mut Entity, incoming: Entity) -> Result<()> {
    let owner = existing.id.clone().unwrap_or_else(|| existing.type_name.clone());
    merge_properties(&mut existing.properties, incoming.properties, &owner)?;
    check_links(&existing.navigation_links, &incoming.navigation_links, &owner)
}

fn merge_complex(existing: &mut ComplexValue, incoming: ComplexValue, owner: &str) -> Result<()> {
    merge_properties(&mut existing.properties, incoming.properties, owner)?;
    check_links(&existing.navigation_links, &incoming.navigation_links, owner)
}

fn merge_properties(existing: &mut Vec<Property>, incoming: Vec<Property>, owner: &str) -> Result<()> {
    if let Some(missing) = existing
        .iter()
        .find(|p| !incoming.iter().any(|n| n.name == p.name))
    {
        return Err(ProcessorError::conversion(format!(
            "property '{}' of '{owner}' is missing in a merged row",
            missing.name
        )));
    }
    for property in incoming {
        match existing.iter_mut().find(|p| p.name == property.name) {
            Some(current) => merge_value(&mut current.value, property.value, owner)?,
            None => existing.push(property),
        }
    }
    Ok(())
}

fn merge_value(existing: &mut PropertyValue, incoming: PropertyValue, owner: &str) -> Result<()> {
    match (existing, incoming) {
        (PropertyValue::Collection(items), PropertyValue::Collection(new_items)) => {
            for item in new_items {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        (PropertyValue::Complex(current), PropertyValue::Complex(new_value)) => {
            merge_complex(current, new_value, owner)?;
        }
        // scalars repeat on fan-out rows
        _ => {}
    }
    Ok(())
}

fn check_links(existing: &[Link], incoming: &[Link], owner: &str) -> Result<()> {
    let mismatch = |title: &str| {
        ProcessorError::new(MessageKey::QueryResultExpandError, [title, owner])
    };
    for link in incoming {
        match existing.iter().find(|l| l.title == link.title) {
            Some(current) if current.inline_count() == link.inline_count() => {}
            _ => return Err(mismatch(&link.title)),
        }
    }
    if let Some(extra) = existing
        .iter()
        .find(|l| !incoming.iter().any(|n| n.title == l.title))
    {
        return Err(mismatch(&extra.title));
    }
    Ok(())
}
