use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};

use crate::host::{Host, SystemHost};
use crate::reconcile::store_path;
use crate::store::list_entries;

/// List registries with an entry in the credential store of `local_user`
pub fn status(local_user: Option<&str>) -> Result<()> {
    let home = SystemHost.home_dir(local_user)?;
    let path = store_path(&home);
    let entries = list_entries(&path)?;

    if entries.is_empty() {
        println!("No registries configured in {}", path.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("REGISTRY").add_attribute(Attribute::Bold),
            Cell::new("USERNAME").add_attribute(Attribute::Bold),
        ]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.registry),
            Cell::new(entry.username.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{}", table);
    println!("\nStore: {}", path.display());

    Ok(())
}
