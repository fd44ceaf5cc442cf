//! The authoritative target model: partitions, groups, records, properties.
//!
//! The on-disk form is an ArchiMate (Archi) model file. Top-level `folder`
//! elements are partitions, nested `folder` elements are groups, and
//! `element` elements are records:
//!
//! ```xml
//! <archimate:model name="Estate" id="m-1">
//!   <folder name="Technology &amp; Physical" id="f-3" type="technology">
//!     <folder name="DC1" id="f-31">
//!       <element xsi:type="archimate:Node" name="web-01" id="e-1">
//!         <property key="AssetId" value="A-2"/>
//!       </element>
//!     </folder>
//!   </folder>
//! </archimate:model>
//! ```
//!
//! Anything the reconciler does not model (documentation, relationships,
//! diagrams, extra attributes) is carried along untouched. On write, each
//! folder emits its other content first, then its groups, then its records,
//! and each record emits its other content before its properties, which is
//! the order Archi itself uses.

use std::path::Path;

use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ModelError;
use crate::models::{find_property, Property};
use crate::xml::{self, XmlElement, XmlNode};

const ELEM_FOLDER: &str = "folder";
const ELEM_ELEMENT: &str = "element";
const ELEM_PROPERTY: &str = "property";

const ATTR_ID: &str = "id";
const ATTR_NAME: &str = "name";
const ATTR_KEY: &str = "key";
const ATTR_VALUE: &str = "value";
const ATTR_XSI_TYPE: &str = "xsi:type";

/// Namespace prefix of element type URIs.
pub const TYPE_PREFIX: &str = "archimate:";

/// Type URI stored on a record created for the given element type.
pub fn type_uri_for(element_type: &str) -> String {
    format!("{TYPE_PREFIX}{element_type}")
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Result of writing a single property onto a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyWrite {
    Added,
    Changed,
    Unchanged,
}

/// An element of the target model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    /// Assigned once at creation, never rewritten.
    id: String,
    pub name: String,
    pub type_uri: String,
    pub properties: Vec<Property>,
    extra_attributes: Vec<(String, String)>,
    extra_children: Vec<XmlNode>,
}

impl TargetRecord {
    /// Create a record with a fresh id.
    pub fn new(name: impl Into<String>, type_uri: impl Into<String>) -> Self {
        Self {
            id: fresh_id(),
            name: name.into(),
            type_uri: type_uri.into(),
            properties: Vec::new(),
            extra_attributes: Vec::new(),
            extra_children: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        find_property(&self.properties, key).map(|p| p.value.as_str())
    }

    /// Whether any property with `key` holds `value`.
    pub fn has_property_value(&self, key: &str, value: &str) -> bool {
        self.properties
            .iter()
            .any(|p| p.key == key && p.value == value)
    }

    /// Create the property if absent, or overwrite its value if different.
    pub fn set_property(&mut self, key: &str, value: &str) -> PropertyWrite {
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(existing) if existing.value == value => PropertyWrite::Unchanged,
            Some(existing) => {
                existing.value = value.to_string();
                PropertyWrite::Changed
            }
            None => {
                self.properties.push(Property::new(key, value));
                PropertyWrite::Added
            }
        }
    }

    fn from_xml(element: &XmlElement) -> Result<Self, ModelError> {
        let id = element
            .attr(ATTR_ID)
            .ok_or_else(|| ModelError::MissingAttribute {
                element: element.name.clone(),
                attribute: ATTR_ID.into(),
            })?
            .to_string();

        let extra_attributes = element
            .attributes
            .iter()
            .filter(|(k, _)| k != ATTR_ID && k != ATTR_NAME && k != ATTR_XSI_TYPE)
            .cloned()
            .collect();

        let mut properties = Vec::new();
        let mut extra_children = Vec::new();
        for child in &element.children {
            match child {
                XmlNode::Element(inner) if inner.local_name() == ELEM_PROPERTY => {
                    match inner.attr(ATTR_KEY) {
                        Some(key) => properties.push(Property::new(
                            key,
                            inner.attr(ATTR_VALUE).unwrap_or_default(),
                        )),
                        None => extra_children.push(child.clone()),
                    }
                }
                other => extra_children.push(other.clone()),
            }
        }

        Ok(Self {
            id,
            name: element.attr(ATTR_NAME).unwrap_or_default().to_string(),
            type_uri: element.attr(ATTR_XSI_TYPE).unwrap_or_default().to_string(),
            properties,
            extra_attributes,
            extra_children,
        })
    }

    fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new(ELEM_ELEMENT);
        if !self.type_uri.is_empty() {
            element.set_attr(ATTR_XSI_TYPE, self.type_uri.as_str());
        }
        if !self.name.is_empty() {
            element.set_attr(ATTR_NAME, self.name.as_str());
        }
        element.set_attr(ATTR_ID, self.id.as_str());
        element.attributes.extend(self.extra_attributes.iter().cloned());

        element.children.extend(self.extra_children.iter().cloned());
        for property in &self.properties {
            element.push_element(
                XmlElement::new(ELEM_PROPERTY)
                    .with_attr(ATTR_KEY, property.key.as_str())
                    .with_attr(ATTR_VALUE, property.value.as_str()),
            );
        }
        element
    }
}

// ---------------------------------------------------------------------------
// Folders
// ---------------------------------------------------------------------------

/// A named folder holding records and nested folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFolder {
    id: Option<String>,
    pub name: String,
    pub groups: Vec<TargetFolder>,
    pub records: Vec<TargetRecord>,
    extra_attributes: Vec<(String, String)>,
    extra_children: Vec<XmlNode>,
}

/// Top-level folder; one per classifier partition.
pub type TargetPartition = TargetFolder;

/// Folder nested inside a partition.
pub type TargetGroup = TargetFolder;

impl TargetFolder {
    /// Create an empty folder with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Some(fresh_id()),
            name: name.into(),
            groups: Vec::new(),
            records: Vec::new(),
            extra_attributes: Vec::new(),
            extra_children: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The direct child group with this name, if any.
    pub fn group(&self, name: &str) -> Result<Option<&TargetFolder>, ModelError> {
        let mut matches = self.groups.iter().filter(|g| g.name == name);
        let first = matches.next();
        let extra = matches.count();
        if extra > 0 {
            return Err(self.duplicate_group(name, extra + 1));
        }
        Ok(first)
    }

    /// Resolve the direct child group with this name, creating it if absent.
    ///
    /// Returns the group and whether it was created.
    pub fn ensure_group(&mut self, name: &str) -> Result<(&mut TargetFolder, bool), ModelError> {
        let positions: Vec<usize> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.name == name)
            .map(|(i, _)| i)
            .collect();

        match positions[..] {
            [] => {
                let index = self.groups.len();
                self.groups.push(TargetFolder::new(name));
                Ok((&mut self.groups[index], true))
            }
            [index] => Ok((&mut self.groups[index], false)),
            _ => Err(self.duplicate_group(name, positions.len())),
        }
    }

    /// Every record in this folder and all nested folders.
    pub fn descendant_records(&self) -> Vec<&TargetRecord> {
        let mut out = Vec::new();
        self.collect_records(&mut out);
        out
    }

    fn collect_records<'a>(&'a self, out: &mut Vec<&'a TargetRecord>) {
        out.extend(self.records.iter());
        for group in &self.groups {
            group.collect_records(out);
        }
    }

    fn record(&self, id: &str) -> Option<&TargetRecord> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .or_else(|| self.groups.iter().find_map(|g| g.record(id)))
    }

    fn record_mut(&mut self, id: &str) -> Option<&mut TargetRecord> {
        if let Some(index) = self.records.iter().position(|r| r.id == id) {
            return Some(&mut self.records[index]);
        }
        self.groups.iter_mut().find_map(|g| g.record_mut(id))
    }

    fn duplicate_group(&self, group: &str, count: usize) -> ModelError {
        ModelError::DuplicateGroup {
            partition: self.name.clone(),
            group: group.to_string(),
            count,
        }
    }

    fn from_xml(element: &XmlElement) -> Result<Self, ModelError> {
        let name = element
            .attr(ATTR_NAME)
            .ok_or_else(|| ModelError::MissingAttribute {
                element: element.name.clone(),
                attribute: ATTR_NAME.into(),
            })?
            .to_string();

        let extra_attributes = element
            .attributes
            .iter()
            .filter(|(k, _)| k != ATTR_ID && k != ATTR_NAME)
            .cloned()
            .collect();

        let mut groups = Vec::new();
        let mut records = Vec::new();
        let mut extra_children = Vec::new();
        for child in &element.children {
            match child {
                XmlNode::Element(inner) if inner.local_name() == ELEM_FOLDER => {
                    groups.push(TargetFolder::from_xml(inner)?)
                }
                XmlNode::Element(inner) if inner.local_name() == ELEM_ELEMENT => {
                    records.push(TargetRecord::from_xml(inner)?)
                }
                other => extra_children.push(other.clone()),
            }
        }

        Ok(Self {
            id: element.attr(ATTR_ID).map(str::to_string),
            name,
            groups,
            records,
            extra_attributes,
            extra_children,
        })
    }

    fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new(ELEM_FOLDER).with_attr(ATTR_NAME, self.name.as_str());
        if let Some(id) = &self.id {
            element.set_attr(ATTR_ID, id.as_str());
        }
        element.attributes.extend(self.extra_attributes.iter().cloned());

        element.children.extend(self.extra_children.iter().cloned());
        for group in &self.groups {
            element.push_element(group.to_xml());
        }
        for record in &self.records {
            element.push_element(record.to_xml());
        }
        element
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum RootChild {
    Partition(TargetPartition),
    Other(XmlNode),
}

/// The parsed target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetModel {
    root_name: String,
    root_attributes: Vec<(String, String)>,
    children: Vec<RootChild>,
}

impl TargetModel {
    /// Load a target document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading target model");
        let root = xml::load_file(path)?;
        let model = Self::from_root(&root)?;
        info!(
            partitions = model.partitions().count(),
            records = model.record_count(),
            "target model loaded"
        );
        Ok(model)
    }

    /// Parse a target document held in memory.
    pub fn from_xml_str(contents: &str) -> Result<Self, ModelError> {
        Self::from_root(&xml::parse_str(contents)?)
    }

    fn from_root(root: &XmlElement) -> Result<Self, ModelError> {
        let mut children = Vec::new();
        for child in &root.children {
            match child {
                XmlNode::Element(inner) if inner.local_name() == ELEM_FOLDER => {
                    children.push(RootChild::Partition(TargetFolder::from_xml(inner)?))
                }
                other => children.push(RootChild::Other(other.clone())),
            }
        }
        Ok(Self {
            root_name: root.name.clone(),
            root_attributes: root.attributes.clone(),
            children,
        })
    }

    /// Serialize the whole tree back to its document form.
    pub fn to_xml_string(&self) -> Result<String, ModelError> {
        let mut root = XmlElement::new(self.root_name.as_str());
        root.attributes = self.root_attributes.clone();
        for child in &self.children {
            match child {
                RootChild::Partition(partition) => root.push_element(partition.to_xml()),
                RootChild::Other(node) => root.children.push(node.clone()),
            }
        }
        xml::to_string(&root)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &TargetPartition> {
        self.children.iter().filter_map(|c| match c {
            RootChild::Partition(p) => Some(p),
            RootChild::Other(_) => None,
        })
    }

    /// The single partition with this name.
    pub fn partition(&self, name: &str) -> Result<&TargetPartition, ModelError> {
        let mut matches = self.partitions().filter(|p| p.name == name);
        let first = matches
            .next()
            .ok_or_else(|| ModelError::PartitionNotFound(name.to_string()))?;
        let extra = matches.count();
        if extra > 0 {
            return Err(ModelError::DuplicatePartition {
                name: name.to_string(),
                count: extra + 1,
            });
        }
        Ok(first)
    }

    /// Mutable access to the single partition with this name.
    pub fn partition_mut(&mut self, name: &str) -> Result<&mut TargetPartition, ModelError> {
        self.partition(name)?;
        self.children
            .iter_mut()
            .find_map(|c| match c {
                RootChild::Partition(p) if p.name == name => Some(p),
                _ => None,
            })
            .ok_or_else(|| ModelError::PartitionNotFound(name.to_string()))
    }

    /// Records anywhere under `partition` carrying property `key` = `value`.
    pub fn find_records(
        &self,
        partition: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<&TargetRecord>, ModelError> {
        let matches: Vec<&TargetRecord> = self
            .partition(partition)?
            .descendant_records()
            .into_iter()
            .filter(|r| r.has_property_value(key, value))
            .collect();
        debug!(partition, key, value, matches = matches.len(), "record lookup");
        Ok(matches)
    }

    pub fn record(&self, id: &str) -> Option<&TargetRecord> {
        self.partitions().find_map(|p| p.record(id))
    }

    pub fn record_mut(&mut self, id: &str) -> Option<&mut TargetRecord> {
        self.children.iter_mut().find_map(|c| match c {
            RootChild::Partition(p) => p.record_mut(id),
            RootChild::Other(_) => None,
        })
    }

    /// Total number of records in all partitions.
    pub fn record_count(&self) -> usize {
        self.partitions().map(|p| p.descendant_records().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> &'static str {
        r#"<?xml version="1.0" encoding="UTF-8"?>
<archimate:model xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:archimate="http://www.archimatetool.com/archimate" name="Estate" id="m-1" version="4.6.0">
  <folder name="Business" id="f-1" type="business"/>
  <folder name="Technology &amp; Physical" id="f-3" type="technology">
    <folder name="DC1" id="f-31">
      <element xsi:type="archimate:Node" name="web-01" id="e-1">
        <documentation>Primary web node</documentation>
        <property key="AssetId" value="A-2"/>
        <property key="Owner" value="Ops"/>
      </element>
      <folder name="Rack 4" id="f-311">
        <element xsi:type="archimate:Device" name="fw-01" id="e-2">
          <property key="AssetId" value="A-1"/>
        </element>
      </folder>
    </folder>
    <element xsi:type="archimate:Node" name="db-01" id="e-3">
      <property key="AssetId" value="A-3"/>
    </element>
  </folder>
  <folder name="Relations" id="f-8" type="relations">
    <element xsi:type="archimate:AssignmentRelationship" id="r-1" source="e-1" target="e-2"/>
  </folder>
  <purpose>Inventory</purpose>
</archimate:model>
"#
    }

    #[test]
    fn test_partitions_and_records() {
        let model = TargetModel::from_xml_str(sample_model()).unwrap();
        let names: Vec<&str> = model.partitions().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Business", "Technology & Physical", "Relations"]);
        assert_eq!(model.record_count(), 4);

        let web = model.record("e-1").unwrap();
        assert_eq!(web.name, "web-01");
        assert_eq!(web.type_uri, "archimate:Node");
        assert_eq!(web.property("Owner"), Some("Ops"));
    }

    #[test]
    fn test_find_records_searches_nested_groups() {
        let model = TargetModel::from_xml_str(sample_model()).unwrap();
        let found = model
            .find_records("Technology & Physical", "AssetId", "A-1")
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "e-2");

        let none = model.find_records("Business", "AssetId", "A-1").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_missing_and_duplicate_partitions() {
        let model = TargetModel::from_xml_str(sample_model()).unwrap();
        assert!(matches!(
            model.partition("Strategy"),
            Err(ModelError::PartitionNotFound(_))
        ));

        let doubled = sample_model().replace(
            "<folder name=\"Business\" id=\"f-1\" type=\"business\"/>",
            "<folder name=\"Business\" id=\"f-1\"/><folder name=\"Business\" id=\"f-2\"/>",
        );
        let model = TargetModel::from_xml_str(&doubled).unwrap();
        assert!(matches!(
            model.find_records("Business", "AssetId", "A-1"),
            Err(ModelError::DuplicatePartition { count: 2, .. })
        ));
    }

    #[test]
    fn test_ensure_group_creates_once() {
        let mut model = TargetModel::from_xml_str(sample_model()).unwrap();
        let partition = model.partition_mut("Business").unwrap();

        let (group, created) = partition.ensure_group("HQ").unwrap();
        assert!(created);
        assert!(group.id().is_some());
        group.records.push(TargetRecord::new("Clerk", type_uri_for("BusinessActor")));

        let (group, created) = partition.ensure_group("HQ").unwrap();
        assert!(!created);
        assert_eq!(group.records.len(), 1);
        assert_eq!(partition.groups.len(), 1);
    }

    #[test]
    fn test_set_property_reports_write() {
        let mut record = TargetRecord::new("n", type_uri_for("Node"));
        assert_eq!(record.set_property("a", "1"), PropertyWrite::Added);
        assert_eq!(record.set_property("a", "1"), PropertyWrite::Unchanged);
        assert_eq!(record.set_property("a", "2"), PropertyWrite::Changed);
        assert_eq!(record.properties, vec![Property::new("a", "2")]);
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = TargetRecord::new("a", "archimate:Node");
        let b = TargetRecord::new("a", "archimate:Node");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_round_trip_preserves_unmodelled_content() {
        let model = TargetModel::from_xml_str(sample_model()).unwrap();
        let written = model.to_xml_string().unwrap();
        assert!(written.contains("<documentation>Primary web node</documentation>"));
        assert!(written.contains("source=\"e-1\""));
        assert!(written.contains("<purpose>Inventory</purpose>"));
        assert!(written.contains("version=\"4.6.0\""));

        let reread = TargetModel::from_xml_str(&written).unwrap();
        assert_eq!(reread, model);
    }

    #[test]
    fn test_record_without_id_is_rejected() {
        let xml = r#"<model><folder name="Other"><element xsi:type="archimate:Location" name="x"/></folder></model>"#;
        assert!(matches!(
            TargetModel::from_xml_str(xml),
            Err(ModelError::MissingAttribute { ref attribute, .. }) if attribute == "id"
        ));
    }
}
