//! Protocol sections and the per-session section manager.
//!
//! A section names one statement or cursor context inside a server
//! package. Dynamic sections come from two packages, one for cursors held
//! over commit and one for cursors closed at commit, so a positioned update
//! must use a section from the same package as the cursor it targets.

use crate::registry::CursorId;
use drda_core::{Error, Holdability, Result};
use std::collections::HashMap;

const HOLD_PACKAGE: &str = "SYSLH000";
const NO_HOLD_PACKAGE: &str = "SYSLN000";

/// Sections available per package.
pub const MAX_SECTIONS: u16 = 32_767;

/// One protocol section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    package: &'static str,
    number: u16,
    client_cursor_name: Option<String>,
    positioned_cursor: Option<String>,
}

impl Section {
    pub fn package(&self) -> &str {
        self.package
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn holdability(&self) -> Holdability {
        if self.package == HOLD_PACKAGE {
            Holdability::HoldCursorsOverCommit
        } else {
            Holdability::CloseCursorsAtCommit
        }
    }

    /// Cursor name the server assigns to a query opened on this section.
    pub fn server_cursor_name(&self) -> String {
        format!("SQL_CUR{}C{}", &self.package[3..], self.number)
    }

    /// Cursor name the caller assigned, when one was set before the query opened.
    pub fn client_cursor_name(&self) -> Option<&str> {
        self.client_cursor_name.as_deref()
    }

    pub(crate) fn set_client_cursor_name(&mut self, name: Option<String>) {
        self.client_cursor_name = name;
    }

    /// For a positioned-update section, the server cursor name of the target query.
    pub fn positioned_cursor_name(&self) -> Option<&str> {
        self.positioned_cursor.as_deref()
    }
}

#[derive(Debug)]
struct Package {
    name: &'static str,
    next: u16,
    free: Vec<u16>,
}

impl Package {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            next: 1,
            free: Vec::new(),
        }
    }

    #[allow(clippy::result_large_err)]
    fn allocate(&mut self) -> Result<Section> {
        let number = if let Some(number) = self.free.pop() {
            number
        } else if self.next <= MAX_SECTIONS {
            let number = self.next;
            self.next += 1;
            number
        } else {
            return Err(Error::Custom(format!(
                "no free sections left in package {}",
                self.name
            )));
        };
        tracing::trace!(package = self.name, section = number, "Allocated section");
        Ok(Section {
            package: self.name,
            number,
            client_cursor_name: None,
            positioned_cursor: None,
        })
    }

    fn release(&mut self, number: u16) {
        if number < self.next && !self.free.contains(&number) {
            self.free.push(number);
        }
    }

    fn in_use(&self) -> usize {
        usize::from(self.next - 1) - self.free.len()
    }
}

/// Allocates sections and maps cursor names to the sections and cursors using them.
#[derive(Debug)]
pub struct SectionManager {
    hold: Package,
    no_hold: Package,
    cursor_name_to_query_section: HashMap<String, Section>,
    cursor_name_to_result_set: HashMap<String, CursorId>,
}

impl Default for SectionManager {
    fn default() -> Self {
        Self {
            hold: Package::new(HOLD_PACKAGE),
            no_hold: Package::new(NO_HOLD_PACKAGE),
            cursor_name_to_query_section: HashMap::new(),
            cursor_name_to_result_set: HashMap::new(),
        }
    }
}

impl SectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn package_mut(&mut self, holdability: Holdability) -> &mut Package {
        if holdability.is_hold() {
            &mut self.hold
        } else {
            &mut self.no_hold
        }
    }

    /// Allocate a dynamic section from the package matching `holdability`.
    #[allow(clippy::result_large_err)]
    pub fn get_dynamic_section(&mut self, holdability: Holdability) -> Result<Section> {
        self.package_mut(holdability).allocate()
    }

    /// Allocate a section for `WHERE CURRENT OF cursor_name` from the package of
    /// the query that opened that cursor. `None` when no open query uses the name.
    #[allow(clippy::result_large_err)]
    pub fn get_positioned_update_section(
        &mut self,
        cursor_name: &str,
        immediate: bool,
    ) -> Result<Option<Section>> {
        let Some(query) = self.cursor_name_to_query_section.get(cursor_name).cloned() else {
            return Ok(None);
        };
        let mut section = self.package_mut(query.holdability()).allocate()?;
        section.client_cursor_name = query.client_cursor_name.clone();
        section.positioned_cursor = Some(query.server_cursor_name());
        tracing::trace!(
            cursor = cursor_name,
            section = section.number,
            immediate,
            "Allocated positioned update section"
        );
        Ok(Some(section))
    }

    /// Return a section to its package.
    pub fn free_section(&mut self, section: &Section) {
        let number = section.number;
        if section.package == HOLD_PACKAGE {
            self.hold.release(number);
        } else {
            self.no_hold.release(number);
        }
    }

    pub fn map_cursor_name_to_query_section(&mut self, name: impl Into<String>, section: Section) {
        self.cursor_name_to_query_section.insert(name.into(), section);
    }

    pub fn map_cursor_name_to_result_set(&mut self, name: impl Into<String>, cursor: CursorId) {
        self.cursor_name_to_result_set.insert(name.into(), cursor);
    }

    /// The open cursor registered under `name`, if any.
    pub fn get_positioned_update_result_set(&self, name: &str) -> Option<CursorId> {
        self.cursor_name_to_result_set.get(name).copied()
    }

    pub fn remove_cursor_name_to_result_set_mapping(
        &mut self,
        client_name: Option<&str>,
        server_name: Option<&str>,
    ) {
        for name in [client_name, server_name].into_iter().flatten() {
            self.cursor_name_to_result_set.remove(name);
        }
    }

    pub fn remove_cursor_name_to_query_section_mapping(
        &mut self,
        client_name: Option<&str>,
        server_name: Option<&str>,
    ) {
        for name in [client_name, server_name].into_iter().flatten() {
            self.cursor_name_to_query_section.remove(name);
        }
    }

    /// Sections currently handed out across both packages.
    pub fn sections_in_use(&self) -> usize {
        self.hold.in_use() + self.no_hold.in_use()
    }

    /// Drop every cursor-name mapping.
    pub fn clear_mappings(&mut self) {
        self.cursor_name_to_query_section.clear();
        self.cursor_name_to_result_set.clear();
    }
}
