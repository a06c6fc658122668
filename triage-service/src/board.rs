use serde::Serialize;
use triage_core::{PatientRecord, PriorityLevel};

/// Records grouped into the three priority columns, each sorted by name.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TriageBoard {
    pub urgent: Vec<PatientRecord>,
    pub amber: Vec<PatientRecord>,
    pub success: Vec<PatientRecord>,
}

impl TriageBoard {
    pub fn from_records(records: impl IntoIterator<Item = PatientRecord>) -> Self {
        let mut board = Self::default();
        for record in records {
            board.column_mut(record.priority()).push(record);
        }
        for level in PriorityLevel::ALL {
            board.column_mut(level).sort_by(|a, b| {
                a.display_name()
                    .cmp(b.display_name())
                    .then_with(|| a.id().cmp(b.id()))
            });
        }
        board
    }

    pub fn column(&self, level: PriorityLevel) -> &[PatientRecord] {
        match level {
            PriorityLevel::Urgent => &self.urgent,
            PriorityLevel::Amber => &self.amber,
            PriorityLevel::Success => &self.success,
        }
    }

    fn column_mut(&mut self, level: PriorityLevel) -> &mut Vec<PatientRecord> {
        match level {
            PriorityLevel::Urgent => &mut self.urgent,
            PriorityLevel::Amber => &mut self.amber,
            PriorityLevel::Success => &mut self.success,
        }
    }

    pub fn len(&self) -> usize {
        self.urgent.len() + self.amber.len() + self.success.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::{DataSource, PatientDraft};

    fn record(id: &str, name: &str, hemoglobin: f64, potassium: f64) -> PatientRecord {
        PatientRecord::new(
            PatientDraft {
                id: id.to_string(),
                display_name: name.to_string(),
                hemoglobin,
                potassium,
                ..PatientDraft::default()
            },
            DataSource::Mock,
        )
    }

    #[test]
    fn groups_by_priority_and_sorts_by_name() {
        let board = TriageBoard::from_records(vec![
            record("1", "Zoe", 7.0, 4.0),
            record("2", "Adam", 12.0, 4.0),
            record("3", "Bella", 6.0, 4.0),
            record("4", "Carl", 10.0, 4.0),
        ]);

        let names = |level| {
            board
                .column(level)
                .iter()
                .map(|r| r.display_name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(PriorityLevel::Urgent), vec!["Bella", "Zoe"]);
        assert_eq!(names(PriorityLevel::Amber), vec!["Carl"]);
        assert_eq!(names(PriorityLevel::Success), vec!["Adam"]);
        assert_eq!(board.len(), 4);
    }

    #[test]
    fn empty_board() {
        assert!(TriageBoard::from_records(Vec::new()).is_empty());
    }
}
