//! Per-record diff logic.
//!
//! Given one import record and read access to the target model, the detector
//! decides whether the record is new (an add) or which of its matched target
//! records have drifted (updates).

use std::sync::Arc;

use tracing::info;

use crate::classifier::ElementClassifier;
use crate::errors::DiffError;
use crate::import_model::{ImportRecord, ImportSettings};
use crate::queue::{AddChange, ChangeRecord, UpdateChange, UpdateReason};
use crate::target_model::{TargetModel, TargetRecord};

/// Stateless detector comparing import records with the target model.
pub struct DiffDetector;

impl DiffDetector {
    /// Classify and compare a single import record.
    ///
    /// - no target record in the classified partition carries the identity
    ///   value: one [`ChangeRecord::Add`];
    /// - otherwise one [`ChangeRecord::Update`] per matched target record that
    ///   differs, and nothing for matches that are already in sync.
    ///
    /// Every match is diffed on its own, so duplicated identity values in the
    /// target each receive their own update.
    pub fn diff_record(
        record: &Arc<ImportRecord>,
        model: &TargetModel,
        settings: &ImportSettings,
    ) -> Result<Vec<ChangeRecord>, DiffError> {
        let partition = ElementClassifier::classify(&record.record_type)?;
        let matches = model.find_records(
            partition.folder_name(),
            &settings.identity_key,
            &record.identity_value,
        )?;

        if matches.is_empty() {
            info!(name = %record.name, identity = %record.identity_value, "add detected");
            return Ok(vec![ChangeRecord::Add(AddChange {
                import: record.clone(),
            })]);
        }

        let mut changes = Vec::new();
        for target in matches {
            let Some(reason) = Self::first_difference(record, target, settings) else {
                continue;
            };
            match &reason {
                UpdateReason::NameChanged { .. } => {
                    info!(record_id = target.id(), name = %target.name, "name change detected")
                }
                UpdateReason::PropertyAdded { key } => {
                    info!(record_id = target.id(), name = %target.name, key = %key, "property add detected")
                }
                UpdateReason::PropertyChanged { key } => {
                    info!(record_id = target.id(), name = %target.name, key = %key, "property update detected")
                }
            }
            changes.push(ChangeRecord::Update(UpdateChange {
                target_id: target.id().to_string(),
                target_name: target.name.clone(),
                import: record.clone(),
                reason,
            }));
        }
        Ok(changes)
    }

    /// The first difference between an import record and a matched target.
    ///
    /// A name mismatch wins outright. Otherwise the non-excluded import
    /// properties are scanned in import order and the scan stops at the
    /// first missing or differing key; later differences are left for the
    /// apply phase, which reconciles every property.
    pub fn first_difference(
        record: &ImportRecord,
        target: &TargetRecord,
        settings: &ImportSettings,
    ) -> Option<UpdateReason> {
        if target.name != record.name {
            return Some(UpdateReason::NameChanged {
                old: target.name.clone(),
                new: record.name.clone(),
            });
        }

        for property in record.compared_properties(settings) {
            match target.property(&property.key) {
                None => {
                    return Some(UpdateReason::PropertyAdded {
                        key: property.key.clone(),
                    })
                }
                Some(value) if value != property.value => {
                    return Some(UpdateReason::PropertyChanged {
                        key: property.key.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ModelError;
    use crate::models::Property;

    fn model() -> TargetModel {
        TargetModel::from_xml_str(
            r#"<archimate:model name="m" id="m">
  <folder name="Technology &amp; Physical" id="f-1">
    <folder name="G1" id="f-2">
      <element xsi:type="archimate:Node" name="N1" id="e-1">
        <property key="idx" value="IDX1"/>
        <property key="a" value="1"/>
        <property key="secret" value="old"/>
      </element>
      <element xsi:type="archimate:Node" name="N2" id="e-2">
        <property key="idx" value="DUP"/>
        <property key="a" value="1"/>
      </element>
      <element xsi:type="archimate:Node" name="N2" id="e-3">
        <property key="idx" value="DUP"/>
        <property key="a" value="2"/>
      </element>
    </folder>
  </folder>
  <folder name="Business" id="f-3">
    <element xsi:type="archimate:BusinessActor" name="Clerk" id="e-4">
      <property key="idx" value="IDX1"/>
    </element>
  </folder>
</archimate:model>"#,
        )
        .unwrap()
    }

    fn settings() -> ImportSettings {
        ImportSettings {
            identity_key: "idx".into(),
            excluded_keys: vec!["secret".into()],
            ..Default::default()
        }
    }

    fn record(record_type: &str, name: &str, identity: &str, props: &[(&str, &str)]) -> Arc<ImportRecord> {
        Arc::new(ImportRecord {
            record_type: record_type.into(),
            name: name.into(),
            identity_value: identity.into(),
            group: "G1".into(),
            properties: props.iter().map(|(k, v)| Property::new(*k, *v)).collect(),
        })
    }

    fn updates(changes: &[ChangeRecord]) -> Vec<&UpdateChange> {
        changes
            .iter()
            .filter_map(|c| match c {
                ChangeRecord::Update(u) => Some(u),
                ChangeRecord::Add(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_unmatched_record_is_one_add() {
        let rec = record("Node", "N9", "IDX9", &[("a", "1")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], ChangeRecord::Add(ref a) if a.import.name == "N9"));
    }

    #[test]
    fn test_match_is_scoped_to_classified_partition() {
        // Goals belong under Motivation, which this model lacks.
        let rec = record("Goal", "N1", "IDX1", &[]);
        let err = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap_err();
        assert!(matches!(err, DiffError::Model(ModelError::PartitionNotFound(_))));
        assert!(err.is_worker_fault());
    }

    #[test]
    fn test_equal_record_produces_nothing() {
        let rec = record("Node", "N1", "IDX1", &[("idx", "IDX1"), ("a", "1")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_excluded_property_never_triggers_update() {
        let rec = record("Node", "N1", "IDX1", &[("a", "1"), ("secret", "new")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_name_mismatch_is_an_update() {
        let rec = record("Node", "Renamed", "IDX1", &[("a", "1")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        let ups = updates(&changes);
        assert_eq!(ups.len(), 1);
        assert_eq!(ups[0].target_id, "e-1");
        assert_eq!(
            ups[0].reason,
            UpdateReason::NameChanged {
                old: "N1".into(),
                new: "Renamed".into()
            }
        );
    }

    #[test]
    fn test_first_difference_short_circuits() {
        let rec = record("Node", "N1", "IDX1", &[("a", "9"), ("b", "new")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        let ups = updates(&changes);
        assert_eq!(ups.len(), 1, "one update per matched pair");
        assert_eq!(ups[0].reason, UpdateReason::PropertyChanged { key: "a".into() });
    }

    #[test]
    fn test_missing_property_is_an_update() {
        let rec = record("Node", "N1", "IDX1", &[("a", "1"), ("b", "new")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        assert_eq!(
            updates(&changes)[0].reason,
            UpdateReason::PropertyAdded { key: "b".into() }
        );
    }

    #[test]
    fn test_duplicate_identity_values_diffed_independently() {
        let rec = record("Node", "N2", "DUP", &[("a", "1")]);
        let changes = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap();
        let ups = updates(&changes);
        assert_eq!(ups.len(), 1, "only the drifted duplicate is updated");
        assert_eq!(ups[0].target_id, "e-3");
    }

    #[test]
    fn test_unknown_type_is_not_a_fault() {
        let rec = record("Starship", "S", "IDX1", &[]);
        let err = DiffDetector::diff_record(&rec, &model(), &settings()).unwrap_err();
        assert!(matches!(err, DiffError::UnknownType(_)));
        assert!(!err.is_worker_fault());
    }
}
