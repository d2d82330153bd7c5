//! Markdown report written next to each model as `{name}.md`.

use super::handle::ModelHandle;
use super::registry::ModelRegistry;
use crate::error::{Result, ShelfError};
use crate::format::{format_size_bytes, format_size_kb};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{debug, info};

impl ModelRegistry {
    /// Render the report for a model.
    pub fn build_report(&self, handle: &ModelHandle) -> Result<String> {
        handle.ensure_live()?;
        let local_file = handle.filename().to_string();
        let mut md = String::new();

        match self.link(handle) {
            None => {
                let size = self
                    .size(handle)
                    .map(format_size_bytes)
                    .unwrap_or_default();
                let _ = writeln!(md, "# {}\n", handle.name());
                let _ = writeln!(md, "| | |\n|---|---|");
                let _ = writeln!(md, "| Local file | {} |", local_file);
                let _ = writeln!(md, "| AutoV2 | {} |", handle.short_hash());
                let _ = writeln!(md, "| Size | {} |", size);
            }
            Some(link) => {
                let _ = writeln!(md, "# {}\n", link.model.name);
                let _ = writeln!(md, "{}\n", link.version.url());

                let tags: Vec<String> = link.model.tags.iter().map(|t| format!("`{}`", t)).collect();
                if !tags.is_empty() {
                    let _ = writeln!(md, "**Tags:** {}\n", tags.join(", "));
                }

                let installed: HashSet<u64> = self
                    .installed_by_model(handle)
                    .iter()
                    .filter_map(|m| self.link(m).map(|l| l.version.id))
                    .collect();
                let _ = writeln!(md, "## Versions\n");
                for version in &link.model.model_versions {
                    if !self.settings.all_versions_in_report && !installed.contains(&version.id) {
                        continue;
                    }
                    let mut markers = String::new();
                    if installed.contains(&version.id) {
                        markers.push_str(" (installed)");
                    }
                    if version.id == link.version.id {
                        markers.push_str(" (current)");
                    }
                    let _ = writeln!(md, "- **{}**{}", version.full_name(), markers);
                }

                let _ = writeln!(md, "\n## File\n");
                let _ = writeln!(md, "| | |\n|---|---|");
                let _ = writeln!(md, "| Local file | {} |", local_file);
                let _ = writeln!(md, "| Remote file | {} |", link.file.name);
                let _ = writeln!(md, "| AutoV2 | {} |", link.file.auto_v2().unwrap_or_default());
                let _ = writeln!(md, "| Type | {} |", link.file.description());
                let _ = writeln!(md, "| Size | {} |", format_size_kb(link.file.size_kb));
            }
        }

        if let Some(companion_file) = self.companion_file(handle) {
            let local = self
                .companion_of(handle)
                .map(|m| m.filename().to_string())
                .unwrap_or_else(|| "`NOT INSTALLED`".to_string());
            let _ = writeln!(md, "\n## VAE\n");
            let _ = writeln!(md, "| | |\n|---|---|");
            let _ = writeln!(md, "| Local file | {} |", local);
            let _ = writeln!(md, "| Remote file | {} |", companion_file.name);
            let _ = writeln!(md, "| AutoV2 | {} |", companion_file.auto_v2().unwrap_or_default());
        }

        let included_by = self.included_by(handle);
        if !included_by.is_empty() {
            let _ = writeln!(md, "\n## Included by\n");
            for parent in included_by {
                let _ = writeln!(md, "- {}", parent.filename());
            }
        }

        let trigger_words = self.trigger_words(handle);
        if !trigger_words.is_empty() {
            let _ = writeln!(md, "\n## Trigger words\n");
            for word in trigger_words {
                let _ = writeln!(md, "- {}", word);
            }
        }

        Ok(md)
    }

    /// Overwrite the model's report with current information.
    pub fn generate_report(&self, handle: &ModelHandle) -> Result<PathBuf> {
        let markdown = self.build_report(handle)?;
        let path = self.report_file(handle);
        std::fs::write(&path, markdown).map_err(|e| ShelfError::io_with_path(e, &path))?;
        debug!("Generated report {}", path.display());
        Ok(path)
    }

    /// Rebuild every installed model's report.
    pub fn refresh_reports(&self) -> Result<usize> {
        let mut count = 0;
        for handle in self.all() {
            self.generate_report(&handle)?;
            count += 1;
        }
        info!("Refreshed {} reports", count);
        Ok(count)
    }
}
