use std::fmt;

use modsel_core::{DownloadAction, ModuleStatus, SelectionSession};

/// One printable line per catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub id: String,
    pub name: String,
    pub status: ModuleStatus,
    pub local: Option<String>,
    pub online: Option<String>,
    pub action: Option<DownloadAction>,
}

impl fmt::Display for CatalogRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<28} {:<10} {:<10} {}",
            format!("{} ({})", self.name, self.id),
            self.local.as_deref().unwrap_or("-"),
            self.online.as_deref().unwrap_or("-"),
            self.status
        )?;
        if let Some(action) = self.action {
            write!(f, " [{}]", action.label())?;
        }
        Ok(())
    }
}

pub fn catalog_rows(session: &SelectionSession) -> Vec<CatalogRow> {
    session
        .catalog()
        .iter()
        .map(|entry| CatalogRow {
            id: entry.id().to_string(),
            name: entry.display_name().to_string(),
            status: ModuleStatus::of(entry, session.is_protected(entry.id())),
            local: entry.latest_local().map(|m| m.version.to_string()),
            online: entry.online().map(|m| m.version.to_string()),
            action: DownloadAction::for_entry(entry),
        })
        .collect()
}
