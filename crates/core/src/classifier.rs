//! Element type to partition mapping.
//!
//! Every ArchiMate element type belongs to exactly one top-level folder of
//! the target model. The mapping is fixed; types outside the vocabulary are
//! rejected with [`ClassifyError::UnknownType`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ClassifyError;

/// Top-level folder of the target model that holds a family of element types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Strategy,
    Business,
    Application,
    Technology,
    Motivation,
    Implementation,
    Other,
}

impl Partition {
    /// Name of the partition folder as it appears in the target document.
    pub fn folder_name(self) -> &'static str {
        match self {
            Self::Strategy => "Strategy",
            Self::Business => "Business",
            Self::Application => "Application",
            Self::Technology => "Technology & Physical",
            Self::Motivation => "Motivation",
            Self::Implementation => "Implementation & Migration",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// Stateless classifier from element type name to [`Partition`].
pub struct ElementClassifier;

impl ElementClassifier {
    /// Resolve the partition for an element type.
    pub fn classify(element_type: &str) -> Result<Partition, ClassifyError> {
        let partition = match element_type {
            "ApplicationComponent"
            | "ApplicationCollaboration"
            | "ApplicationInterface"
            | "ApplicationFunction"
            | "ApplicationInteraction"
            | "ApplicationProcess"
            | "ApplicationEvent"
            | "ApplicationService"
            | "DataObject" => Partition::Application,

            "Product"
            | "BusinessActor"
            | "BusinessRole"
            | "BusinessCollaboration"
            | "BusinessInterface"
            | "BusinessProcess"
            | "BusinessFunction"
            | "BusinessInteraction"
            | "BusinessEvent"
            | "BusinessService"
            | "BusinessObject"
            | "Contract"
            | "Representation" => Partition::Business,

            "Capability" | "CourseOfAction" | "Resource" => Partition::Strategy,

            "Node"
            | "Device"
            | "SystemSoftware"
            | "TechnologyCollaboration"
            | "Path"
            | "CommunicationNetwork"
            | "TechnologyFunction"
            | "TechnologyProcess"
            | "TechnologyInteraction"
            | "TechnologyEvent"
            | "TechnologyService"
            | "Artifact"
            | "Equipment"
            | "Facility"
            | "DistributionNetwork"
            | "Material" => Partition::Technology,

            "Stakeholder" | "Driver" | "Assessment" | "Goal" | "Outcome" | "Principle"
            | "Requirement" | "Constraint" | "Meaning" | "Value" => Partition::Motivation,

            "WorkPackage" | "Deliverable" | "ImplementationEvent" | "Plateau" | "Gap" => {
                Partition::Implementation
            }

            "Location" | "Grouping" | "AndJunction" | "OrJunction" => Partition::Other,

            other => {
                debug!(element_type = other, "unclassifiable element type");
                return Err(ClassifyError::UnknownType(other.to_string()));
            }
        };
        Ok(partition)
    }
}
