use std::collections::BTreeMap;

use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, validate_code, validate_row, validate_specs};
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_pc(&self, draft: PcDraft) -> Result<Pc, EngineError> {
        let _writers = self.writers.read().await;
        let code = validate_code(&draft.code)?;
        validate_row(draft.row)?;
        validate_specs(&draft.specs)?;

        let _registry = self.registry_lock.lock().await;
        if self.pcs.len() >= MAX_PCS {
            return Err(EngineError::LimitExceeded("too many pcs"));
        }
        if self.pcs.contains_key(&draft.id) {
            return Err(EngineError::AlreadyExists(draft.id));
        }
        if self.pc_codes.contains_key(&code) {
            return Err(EngineError::DuplicateCode(code));
        }

        let now = now_ms();
        let pc = Pc {
            id: draft.id,
            code,
            row: draft.row,
            status: draft.status,
            specs: draft.specs,
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
        };
        self.wal_append(&Event::PcRegistered { pc: pc.clone() }).await?;
        self.apply_pc(pc.clone());
        debug!(pc = %pc.code, id = %pc.id, "pc registered");
        Ok(pc)
    }

    pub async fn update_pc(&self, id: Ulid, patch: PcPatch) -> Result<Pc, EngineError> {
        let _writers = self.writers.read().await;
        let _registry = self.registry_lock.lock().await;
        let mut pc = self.get_pc(&id).ok_or(EngineError::NotFound(id))?;

        if let Some(code) = patch.code {
            let code = validate_code(&code)?;
            if code != pc.code && self.pc_codes.contains_key(&code) {
                return Err(EngineError::DuplicateCode(code));
            }
            pc.code = code;
        }
        if let Some(row) = patch.row {
            validate_row(row)?;
            pc.row = row;
        }
        if let Some(specs) = patch.specs {
            validate_specs(&specs)?;
            pc.specs.merge(specs);
        }
        if let Some(status) = patch.status {
            pc.status = status;
        }
        pc.updated_at = now_ms();

        self.wal_append(&Event::PcUpdated { pc: pc.clone() }).await?;
        self.apply_pc(pc.clone());
        debug!(pc = %pc.code, status = pc.status.as_str(), "pc updated");
        Ok(pc)
    }

    /// Hard delete. Bookings that reference the PC are left in place and read
    /// as unavailable from then on.
    pub async fn delete_pc(&self, id: Ulid) -> Result<(), EngineError> {
        let _writers = self.writers.read().await;
        let _registry = self.registry_lock.lock().await;
        if !self.pcs.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::PcRemoved { id }).await?;
        self.apply_pc_removed(&id);
        debug!(%id, "pc removed");
        Ok(())
    }

    /// PCs matching `filter`, ordered by row then code.
    pub fn list_pcs(&self, filter: &PcFilter) -> Vec<Pc> {
        let mut pcs: Vec<Pc> = self
            .pcs
            .iter()
            .filter(|e| filter.row.is_none_or(|r| e.row == r))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .map(|e| e.value().clone())
            .collect();
        pcs.sort_by(|a, b| a.row.cmp(&b.row).then_with(|| a.code.cmp(&b.code)));
        pcs
    }

    pub fn pcs_by_row(&self) -> BTreeMap<u8, Vec<Pc>> {
        let mut rows: BTreeMap<u8, Vec<Pc>> = BTreeMap::new();
        for pc in self.list_pcs(&PcFilter::default()) {
            rows.entry(pc.row).or_default().push(pc);
        }
        rows
    }

    pub fn active_pcs(&self) -> Vec<Pc> {
        self.list_pcs(&PcFilter {
            status: Some(PcStatus::Active),
            ..Default::default()
        })
    }
}
