use indexmap::IndexMap;

use crate::utils::{parent_dir, resolve_href};

/// Represents the decoded `META-INF/container.xml`
///
/// The container is the directory of the package documents of a publication.
/// Once decoded it is never modified; the package documents it points to are
/// parsed into separate [Rootfile] values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    /// The rootfile descriptors, in declaration order
    pub rootfiles: Vec<RootfileDescriptor>,
}

/// Location of a package document, as declared by a `rootfile` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootfileDescriptor {
    /// Path of the package document, relative to the archive root
    pub full_path: String,

    /// Declared media type, usually `application/oebps-package+xml`
    pub media_type: String,
}

/// A package document resolved from a [RootfileDescriptor]
#[derive(Debug, Clone)]
pub struct Rootfile {
    /// Path of the package document, relative to the archive root
    pub full_path: String,

    /// Declared media type of the package document
    pub media_type: String,

    /// The parsed package document
    pub package: Package,
}

impl Rootfile {
    /// Returns the directory the package document lives in
    ///
    /// Relative hrefs of the package are resolved against this directory.
    pub fn base_dir(&self) -> &str {
        parent_dir(&self.full_path)
    }

    /// Resolves an href of the package document into an archive entry name
    ///
    /// Returns `None` when the href climbs above the archive root.
    pub fn resolve(&self, href: &str) -> Option<String> {
        resolve_href(self.base_dir(), href)
    }
}

/// Represents a package document (OPF)
#[derive(Debug, Clone, Default)]
pub struct Package {
    /// The `version` attribute of the `package` element
    pub version: Option<String>,

    /// The `unique-identifier` attribute of the `package` element
    ///
    /// This is the id of the `dc:identifier` that identifies the publication.
    pub unique_identifier: Option<String>,

    pub metadata: Metadata,

    pub manifest: Manifest,

    pub spine: Spine,

    /// The legacy guide, `None` when the package has no `guide` element
    pub guide: Option<Guide>,
}

impl Package {
    /// Returns the manifest items referenced by the spine, in reading order
    ///
    /// Itemrefs that do not resolve are skipped; on a validated document every
    /// itemref resolves.
    pub fn spine_items(&self) -> impl Iterator<Item = &ManifestItem> {
        self.spine
            .items
            .iter()
            .filter_map(|item| self.manifest.get(&item.idref))
    }

    /// Returns the manifest item declared as the cover image
    ///
    /// An item carrying the `cover-image` property wins. Otherwise a
    /// `<meta name="cover" content="..."/>` entry is followed to the manifest
    /// item whose id is the meta content.
    pub fn cover_item(&self) -> Option<&ManifestItem> {
        if let Some(item) = self
            .manifest
            .values()
            .find(|item| item.has_property("cover-image"))
        {
            return Some(item);
        }

        self.metadata
            .meta
            .iter()
            .filter(|meta| meta.name.as_deref() == Some("cover"))
            .filter_map(|meta| meta.content.as_deref())
            .find_map(|id| self.manifest.get(id))
    }
}

/// Bibliographic metadata of a package
///
/// The singular fields hold the first occurrence of the matching Dublin Core
/// element. Every child of the `metadata` element, known or not, is also kept in
/// [items](Metadata::items) so that it can be queried later.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub creator: Option<Creator>,
    pub identifiers: Vec<Identifier>,
    pub date: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub contributor: Option<Contributor>,
    pub subject: Option<String>,
    pub language: Option<String>,

    /// The `meta` elements, in declaration order
    ///
    /// Duplicate names are kept.
    pub meta: Vec<MetaEntry>,

    /// Every child element of `metadata`, in declaration order
    pub items: Vec<MetadataItem>,
}

impl Metadata {
    /// Returns the content of every `meta` entry with the given name
    pub fn meta_content<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.meta
            .iter()
            .filter(move |meta| meta.name.as_deref() == Some(name))
            .filter_map(|meta| meta.content.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Creator {
    pub name: String,
    pub role: Option<String>,
    pub file_as: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contributor {
    pub name: String,
    pub role: Option<String>,
}

/// A `dc:identifier` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifier {
    /// The `id` attribute
    pub id: Option<String>,

    /// The `scheme` (or `opf:scheme`) attribute, for example `ISBN`
    pub scheme: Option<String>,

    /// The text content of the element
    pub value: String,
}

/// A `meta` element of the metadata block
///
/// EPUB 2 uses `name`/`content` pairs, EPUB 3 uses a `property` attribute with
/// the value as text content; both shapes are kept as found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaEntry {
    pub name: Option<String>,
    pub content: Option<String>,
    pub property: Option<String>,
    pub refines: Option<String>,
    pub text: String,
}

/// Generic view of a metadata child element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    /// The local name of the element, e.g. `title`, `creator` or `meta`
    pub property: String,

    /// The namespace URI of the element, if declared
    pub namespace: Option<String>,

    /// The whitespace-normalized text content
    pub value: String,

    /// The attributes of the element, sorted by qualified name
    pub attributes: Vec<(String, String)>,
}

impl MetadataItem {
    /// Returns the value of the attribute with the given qualified or local name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| {
                key == name
                    || key
                        .split_once(':')
                        .is_some_and(|(_, local_name)| local_name == name)
            })
            .map(|(_, value)| value.as_str())
    }
}

/// The manifest of a package, keyed by item id in declaration order
pub type Manifest = IndexMap<String, ManifestItem>;

/// Represents a resource item declared in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,

    /// The href as written in the package document
    ///
    /// Relative to the directory of the package document; use
    /// [Rootfile::resolve] to obtain the archive entry name.
    pub href: String,

    pub media_type: String,

    /// Space-separated list of properties, e.g. `nav` or `cover-image`
    pub properties: Option<String>,

    /// Id of the manifest item to use when this media type is unsupported
    pub fallback: Option<String>,
}

impl ManifestItem {
    /// Checks whether the item declares the given property
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|properties| properties.split_whitespace().any(|p| p == property))
    }
}

/// Reading order of a package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spine {
    /// The `toc` attribute: id of the NCX navigation item (EPUB 2)
    pub toc: Option<String>,

    /// The itemrefs, in reading order
    pub items: Vec<SpineItem>,
}

impl Spine {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Represents an `itemref` of the spine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The id of the referenced manifest item
    pub idref: String,

    pub id: Option<String>,

    /// `false` when the itemref is declared `linear="no"`
    pub linear: bool,

    pub properties: Option<String>,
}

/// The legacy guide of a package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guide {
    pub references: Vec<GuideReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuideReference {
    pub href: String,
    pub title: String,
    pub reference_type: String,
}
