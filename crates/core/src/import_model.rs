//! The import feed: defaults plus an ordered list of flat element records.
//!
//! Expected document shape:
//!
//! ```xml
//! <model>
//!   <defaults>
//!     <properties>
//!       <property key="Hostname"/>
//!       <property key="Password" exclude="true"/>
//!     </properties>
//!     <group><property key="Site"/></group>
//!     <index><property key="AssetId"/></index>
//!     <name mask="{0}"><property key="Hostname"/></name>
//!     <type default="Node"><property key="Kind"/></type>
//!   </defaults>
//!   <elements>
//!     <element type="Node" name="web-01" index="A-100" group="DC1">
//!       <property key="Hostname" value="web-01"/>
//!     </element>
//!   </elements>
//! </model>
//! ```
//!
//! Everything here is read-only once loaded; records are handed to the diff
//! workers behind `Arc`s.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::Property;
use crate::xml::{self, XmlElement};

const ELEM_DEFAULTS: &str = "defaults";
const ELEM_PROPERTIES: &str = "properties";
const ELEM_PROPERTY: &str = "property";
const ELEM_GROUP: &str = "group";
const ELEM_INDEX: &str = "index";
const ELEM_NAME: &str = "name";
const ELEM_TYPE: &str = "type";
const ELEM_ELEMENTS: &str = "elements";
const ELEM_ELEMENT: &str = "element";

const ATTR_KEY: &str = "key";
const ATTR_VALUE: &str = "value";
const ATTR_EXCLUDE: &str = "exclude";
const ATTR_MASK: &str = "mask";
const ATTR_DEFAULT: &str = "default";
const ATTR_TYPE: &str = "type";
const ATTR_NAME: &str = "name";
const ATTR_INDEX: &str = "index";
const ATTR_GROUP: &str = "group";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Display-name template: a mask plus the ordered property keys it draws on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTemplate {
    pub mask: String,
    pub parts: Vec<String>,
}

/// Feed-wide settings taken from the `defaults` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSettings {
    /// Property key matched against the target to find a record's twin.
    pub identity_key: String,
    /// Property key naming the group a record belongs to.
    pub group_key: String,
    pub name_template: NameTemplate,
    /// Every declared property key, in declaration order.
    pub property_keys: Vec<String>,
    /// Keys that are never read, written or compared.
    pub excluded_keys: Vec<String>,
    pub type_key: String,
    /// Element type used when an element omits its own.
    pub type_default: String,
}

impl ImportSettings {
    pub fn is_excluded(&self, key: &str) -> bool {
        self.excluded_keys.iter().any(|k| k == key)
    }
}

/// One element of the import feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub record_type: String,
    pub name: String,
    pub identity_value: String,
    pub group: String,
    pub properties: Vec<Property>,
}

impl ImportRecord {
    /// Properties that take part in comparison and application.
    pub fn compared_properties<'a>(
        &'a self,
        settings: &'a ImportSettings,
    ) -> impl Iterator<Item = &'a Property> {
        self.properties
            .iter()
            .filter(move |p| !settings.is_excluded(&p.key))
    }
}

/// A parsed import feed.
#[derive(Debug, Clone)]
pub struct ImportSource {
    settings: Arc<ImportSettings>,
    records: Vec<Arc<ImportRecord>>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ImportSource {
    /// Build a source from already-parsed parts, checking the settings.
    pub fn new(settings: ImportSettings, records: Vec<ImportRecord>) -> Result<Self, ConfigError> {
        if settings.identity_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "defaults/index".into(),
                detail: "identity key must not be empty".into(),
            });
        }
        if settings.is_excluded(&settings.identity_key) {
            return Err(ConfigError::InvalidValue {
                field: "defaults/index".into(),
                detail: format!(
                    "identity key '{}' is listed as an excluded property",
                    settings.identity_key
                ),
            });
        }
        Ok(Self {
            settings: Arc::new(settings),
            records: records.into_iter().map(Arc::new).collect(),
        })
    }

    /// Load an import document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading import document");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let root = xml::load_file(path)?;
        Self::from_root(&root)
    }

    /// Parse an import document held in memory.
    pub fn from_xml_str(contents: &str) -> Result<Self, ConfigError> {
        let root = xml::parse_str(contents)?;
        Self::from_root(&root)
    }

    fn from_root(root: &XmlElement) -> Result<Self, ConfigError> {
        let settings = load_defaults(root)?;
        let records = load_elements(root, &settings)?;
        info!(
            records = records.len(),
            identity_key = %settings.identity_key,
            excluded = settings.excluded_keys.len(),
            "import document loaded"
        );
        Self::new(settings, records)
    }

    pub fn settings(&self) -> &Arc<ImportSettings> {
        &self.settings
    }

    pub fn records(&self) -> &[Arc<ImportRecord>] {
        &self.records
    }

    pub fn identity_key(&self) -> &str {
        &self.settings.identity_key
    }

    pub fn group_key(&self) -> &str {
        &self.settings.group_key
    }

    pub fn property_keys(&self) -> &[String] {
        &self.settings.property_keys
    }

    pub fn excluded_keys(&self) -> &[String] {
        &self.settings.excluded_keys
    }

    pub fn name_template(&self) -> &NameTemplate {
        &self.settings.name_template
    }
}

fn load_defaults(root: &XmlElement) -> Result<ImportSettings, ConfigError> {
    let defaults = single(root, ELEM_DEFAULTS, ELEM_DEFAULTS)?;

    let declared: Vec<&XmlElement> = defaults
        .elements_named(ELEM_PROPERTIES)
        .flat_map(|section| section.elements_named(ELEM_PROPERTY))
        .collect();
    let property_keys = declared
        .iter()
        .filter_map(|p| p.attr(ATTR_KEY))
        .map(str::to_string)
        .collect();
    let excluded_keys = declared
        .iter()
        .filter(|p| p.has_attr(ATTR_EXCLUDE))
        .filter_map(|p| p.attr(ATTR_KEY))
        .map(str::to_string)
        .collect();

    let group = single(defaults, ELEM_GROUP, "defaults/group")?;
    let group_key = single_key(group, "defaults/group")?;

    let index = single(defaults, ELEM_INDEX, "defaults/index")?;
    let identity_key = single_key(index, "defaults/index")?;

    let name = single(defaults, ELEM_NAME, "defaults/name")?;
    let name_template = NameTemplate {
        mask: name.attr(ATTR_MASK).unwrap_or_default().to_string(),
        parts: name
            .elements_named(ELEM_PROPERTY)
            .filter_map(|p| p.attr(ATTR_KEY))
            .map(str::to_string)
            .collect(),
    };

    let type_section = single(defaults, ELEM_TYPE, "defaults/type")?;
    let type_default = type_section
        .attr(ATTR_DEFAULT)
        .unwrap_or_default()
        .to_string();
    let type_key = match type_section.elements_named(ELEM_PROPERTY).count() {
        0 => String::new(),
        _ => single_key(type_section, "defaults/type")?,
    };

    debug!(
        identity_key = %identity_key,
        group_key = %group_key,
        type_default = %type_default,
        "import defaults parsed"
    );

    Ok(ImportSettings {
        identity_key,
        group_key,
        name_template,
        property_keys,
        excluded_keys,
        type_key,
        type_default,
    })
}

fn load_elements(
    root: &XmlElement,
    settings: &ImportSettings,
) -> Result<Vec<ImportRecord>, ConfigError> {
    let default_group = default_group_name();
    let mut records = Vec::new();

    let elements = root
        .elements_named(ELEM_ELEMENTS)
        .flat_map(|section| section.elements_named(ELEM_ELEMENT));

    for (i, element) in elements.enumerate() {
        let position = i + 1;

        let record_type = match element.attr(ATTR_TYPE) {
            Some(t) => t.to_string(),
            None if !settings.type_default.is_empty() => settings.type_default.clone(),
            None => {
                return Err(ConfigError::InvalidElement {
                    position,
                    detail: "no 'type' attribute and no type default".into(),
                })
            }
        };
        let name = element
            .attr(ATTR_NAME)
            .ok_or_else(|| missing_attr(position, ATTR_NAME))?
            .to_string();
        let identity_value = element
            .attr(ATTR_INDEX)
            .ok_or_else(|| missing_attr(position, ATTR_INDEX))?
            .to_string();
        let group = element
            .attr(ATTR_GROUP)
            .map_or_else(|| default_group.clone(), str::to_string);

        let mut properties = Vec::new();
        for property in element.elements_named(ELEM_PROPERTY) {
            match property.attr(ATTR_KEY) {
                Some(key) => properties.push(Property::new(
                    key,
                    property.attr(ATTR_VALUE).unwrap_or_default(),
                )),
                None => warn!(position, name = %name, "ignoring property without a key"),
            }
        }

        records.push(ImportRecord {
            record_type,
            name,
            identity_value,
            group,
            properties,
        });
    }

    Ok(records)
}

/// Group used for elements that do not name one.
pub fn default_group_name() -> String {
    format!("Import {}", Local::now().format("%Y-%b-%d"))
}

fn single<'a>(
    parent: &'a XmlElement,
    name: &str,
    section: &str,
) -> Result<&'a XmlElement, ConfigError> {
    let mut matches = parent.elements_named(name);
    let first = matches
        .next()
        .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
    let extra = matches.count();
    if extra > 0 {
        return Err(ConfigError::AmbiguousSection {
            section: section.to_string(),
            count: extra + 1,
        });
    }
    Ok(first)
}

fn single_key(section: &XmlElement, path: &str) -> Result<String, ConfigError> {
    let property = single(section, ELEM_PROPERTY, &format!("{path}/property"))?;
    property
        .attr(ATTR_KEY)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingSection(format!("{path}/property@key")))
}

fn missing_attr(position: usize, attribute: &str) -> ConfigError {
    ConfigError::InvalidElement {
        position,
        detail: format!("missing '{attribute}' attribute"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_import() -> &'static str {
        r#"
<model>
  <defaults>
    <properties>
      <property key="AssetId"/>
      <property key="Hostname"/>
      <property key="Password" exclude="true"/>
    </properties>
    <group><property key="Site"/></group>
    <index><property key="AssetId"/></index>
    <name mask="{0} ({1})">
      <property key="Hostname"/>
      <property key="AssetId"/>
    </name>
    <type default="Node"><property key="Kind"/></type>
  </defaults>
  <elements>
    <element type="Device" name="fw-01" index="A-1" group="DC1">
      <property key="AssetId" value="A-1"/>
      <property key="Password" value="hunter2"/>
      <property key="Hostname" value="fw-01"/>
    </element>
    <element name="web-01" index="A-2">
      <property key="AssetId" value="A-2"/>
      <property key="Hostname"/>
    </element>
  </elements>
</model>
"#
    }

    #[test]
    fn test_parse_defaults() {
        let source = ImportSource::from_xml_str(sample_import()).unwrap();
        assert_eq!(source.identity_key(), "AssetId");
        assert_eq!(source.group_key(), "Site");
        assert_eq!(source.property_keys(), ["AssetId", "Hostname", "Password"]);
        assert_eq!(source.excluded_keys(), ["Password"]);
        assert_eq!(source.name_template().mask, "{0} ({1})");
        assert_eq!(source.name_template().parts, vec!["Hostname", "AssetId"]);
        assert_eq!(source.settings().type_key, "Kind");
        assert_eq!(source.settings().type_default, "Node");
    }

    #[test]
    fn test_parse_elements() {
        let source = ImportSource::from_xml_str(sample_import()).unwrap();
        let records = source.records();
        assert_eq!(records.len(), 2);

        let fw = &records[0];
        assert_eq!(fw.record_type, "Device");
        assert_eq!(fw.name, "fw-01");
        assert_eq!(fw.identity_value, "A-1");
        assert_eq!(fw.group, "DC1");
        assert_eq!(fw.properties.len(), 3);

        let web = &records[1];
        assert_eq!(web.record_type, "Node", "type default applies");
        assert!(web.group.starts_with("Import "), "default group applies");
        assert_eq!(web.properties[1], Property::new("Hostname", ""));
    }

    #[test]
    fn test_compared_properties_skip_excluded() {
        let source = ImportSource::from_xml_str(sample_import()).unwrap();
        let keys: Vec<&str> = source.records()[0]
            .compared_properties(source.settings())
            .map(|p| p.key.as_str())
            .collect();
        assert_eq!(keys, vec!["AssetId", "Hostname"]);
    }

    #[test]
    fn test_missing_defaults_section() {
        let err = ImportSource::from_xml_str("<model><elements/></model>").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "defaults"));
    }

    #[test]
    fn test_missing_index_section() {
        let xml = sample_import().replace("<index><property key=\"AssetId\"/></index>", "");
        let err = ImportSource::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "defaults/index"));
    }

    #[test]
    fn test_duplicate_group_section() {
        let xml = sample_import().replace(
            "<group><property key=\"Site\"/></group>",
            "<group><property key=\"Site\"/></group><group><property key=\"Zone\"/></group>",
        );
        let err = ImportSource::from_xml_str(&xml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::AmbiguousSection { ref section, count: 2 } if section == "defaults/group"
        ));
    }

    #[test]
    fn test_element_without_index_is_rejected() {
        let xml = sample_import().replace(" index=\"A-2\"", "");
        let err = ImportSource::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidElement { position: 2, .. }));
    }

    #[test]
    fn test_excluded_identity_key_is_rejected() {
        let xml = sample_import().replace(
            "<property key=\"AssetId\"/>\n      <property key=\"Hostname\"/>",
            "<property key=\"AssetId\" exclude=\"true\"/>\n      <property key=\"Hostname\"/>",
        );
        let err = ImportSource::from_xml_str(&xml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ImportSource::load("/nonexistent/import.xml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_malformed_document() {
        let err = ImportSource::from_xml_str("<model><defaults></model>").unwrap_err();
        assert!(matches!(err, ConfigError::Document(_)));
    }
}
