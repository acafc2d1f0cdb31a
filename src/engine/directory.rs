//! Read-only student and batch lookups used to resolve booking person names and
//! a batch's fixed lab period. The records arrive through the directory feed
//! (`register_*`) and are never edited here.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_len, validate_slot};
use super::{Engine, EngineError};

impl Engine {
    pub async fn register_student(&self, student: StudentRecord) -> Result<(), EngineError> {
        let _writers = self.writers.read().await;
        let name = student.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::Validation("student name is empty".into()));
        }
        validate_len(&name, MAX_NAME_LEN, "student name too long")?;
        if let Some(batch_id) = student.batch_id
            && !self.batches.contains_key(&batch_id)
        {
            return Err(EngineError::NotFound(batch_id));
        }
        let student = StudentRecord { name, ..student };
        self.wal_append(&Event::StudentRegistered { student: student.clone() })
            .await?;
        self.students.insert(student.id, student);
        Ok(())
    }

    pub async fn register_batch(&self, batch: BatchRecord) -> Result<(), EngineError> {
        let _writers = self.writers.read().await;
        validate_slot(&batch.timing)?;
        validate_len(&batch.name, MAX_NAME_LEN, "batch name too long")?;
        self.wal_append(&Event::BatchRegistered { batch: batch.clone() })
            .await?;
        self.batches.insert(batch.id, batch);
        Ok(())
    }

    pub fn get_student(&self, id: &Ulid) -> Option<StudentRecord> {
        self.students.get(id).map(|e| e.value().clone())
    }

    pub fn get_batch(&self, id: &Ulid) -> Option<BatchRecord> {
        self.batches.get(id).map(|e| e.value().clone())
    }

    /// The fixed lab period of the student's batch.
    pub fn student_slot(&self, student: &StudentRecord) -> Option<Slot> {
        student
            .batch_id
            .and_then(|bid| self.batches.get(&bid).map(|b| b.timing.clone()))
    }
}
