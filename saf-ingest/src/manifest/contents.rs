//! `contents` manifest codec
//!
//! Two line shapes:
//! - declaration: `<file>[\t<marker>:<value>]*` for files stored inline in the item folder
//! - registration: `-r -s <store> -f <path> [bundle:<name>]` for files already in an asset store

use crate::error::{IngestError, IngestResult};
use saf_common::model::{Action, LICENSE_BUNDLE, ORIGINAL_BUNDLE};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use super::{is_recognized_manifest_file, CONTENTS_FILE};

const LICENSE_FILE: &str = "license.txt";

const BUNDLE_MARKER: &str = "bundle:";
const PERMISSIONS_MARKER: &str = "permissions:";
const DESCRIPTION_MARKER: &str = "description:";
const PRIMARY_MARKER: &str = "primary:true";
const IIIF_LABEL_MARKER: &str = "iiif-label:";
const IIIF_HEIGHT_MARKER: &str = "iiif-height:";
const IIIF_WIDTH_MARKER: &str = "iiif-width:";
const IIIF_TOC_MARKER: &str = "iiif-toc:";

/// Where a bitstream's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitstreamSource {
    /// File inside the item folder, path relative to it
    Inline { path: String },
    /// Bytes already held by asset store `store_number`
    Registered { store_number: i32, path: String },
}

/// Permission override from a `permissions:` marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverride {
    /// `None` when the flag letter was neither `r` nor `w`
    pub action: Option<Action>,
    pub group: String,
}

/// IIIF viewer hints attached to a bitstream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IiifOptions {
    pub label: Option<String>,
    pub height: Option<String>,
    pub width: Option<String>,
    pub toc: Option<String>,
}

impl IiifOptions {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.height.is_none() && self.width.is_none() && self.toc.is_none()
    }
}

/// One parsed line of `contents`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitstreamDeclaration {
    pub source: BitstreamSource,
    pub bundle: String,
    pub description: Option<String>,
    pub primary: bool,
    pub permission: Option<PermissionOverride>,
    pub iiif: IiifOptions,
}

impl BitstreamDeclaration {
    /// Name the bitstream is stored under
    pub fn name(&self) -> &str {
        match &self.source {
            BitstreamSource::Inline { path } => path,
            BitstreamSource::Registered { path, .. } => {
                path.rsplit('/').next().unwrap_or(path)
            }
        }
    }

    /// Whether anything has to be applied after install
    pub fn has_options(&self) -> bool {
        self.permission.is_some() || self.description.is_some() || !self.iiif.is_empty()
    }
}

/// Parse an item folder's `contents` file
///
/// A folder without `contents` is accepted only if it holds nothing but
/// recognised manifest files; its declaration list is then empty.
pub fn parse_contents(item_dir: &Path) -> IngestResult<Vec<BitstreamDeclaration>> {
    let path = item_dir.join(CONTENTS_FILE);
    if !path.exists() {
        return check_metadata_only(item_dir).map(|_| Vec::new());
    }

    let content = std::fs::read_to_string(&path)?;
    let mut declarations = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.trim_start().starts_with("-r ") {
            match parse_registration_line(line.trim()) {
                Some(declaration) => declarations.push(declaration),
                None => warn!(
                    "Skipping malformed registration line in {}: {:?}",
                    path.display(),
                    line
                ),
            }
            continue;
        }

        let declaration = parse_declaration_line(line);
        if let BitstreamSource::Inline { path: file } = &declaration.source {
            if !is_folder_relative(file) {
                return Err(IngestError::manifest(
                    &path,
                    format!("declared file {:?} is not inside the item folder", file),
                ));
            }
            if !item_dir.join(file).is_file() {
                return Err(IngestError::manifest(
                    &path,
                    format!("declared file {:?} does not exist", file),
                ));
            }
        }
        declarations.push(declaration);
    }

    Ok(declarations)
}

/// Relative path made only of normal components (no root, `.` or `..`)
fn is_folder_relative(file: &str) -> bool {
    let path = Path::new(file);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn check_metadata_only(item_dir: &Path) -> IngestResult<()> {
    for entry in std::fs::read_dir(item_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !is_recognized_manifest_file(&name) {
            return Err(IngestError::MissingContents(item_dir.to_path_buf()));
        }
    }
    Ok(())
}

/// Parse a `<file>[\t<marker>:<value>]*` line
pub fn parse_declaration_line(line: &str) -> BitstreamDeclaration {
    let file = line.split('\t').next().unwrap_or(line).trim().to_string();

    let bundle = marker_value(line, BUNDLE_MARKER)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_inline_bundle(&file).to_string());

    BitstreamDeclaration {
        bundle,
        description: marker_value(line, DESCRIPTION_MARKER)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        primary: line.contains(&format!("\t{}", PRIMARY_MARKER)),
        permission: marker_value(line, PERMISSIONS_MARKER).map(parse_permission),
        iiif: IiifOptions {
            label: marker_value(line, IIIF_LABEL_MARKER).map(str::to_string),
            height: marker_value(line, IIIF_HEIGHT_MARKER).map(str::to_string),
            width: marker_value(line, IIIF_WIDTH_MARKER).map(str::to_string),
            toc: marker_value(line, IIIF_TOC_MARKER).map(str::to_string),
        },
        source: BitstreamSource::Inline { path: file },
    }
}

/// Parse a `-r -s <store> -f <path> ...` line
///
/// Returns `None` when the store number or path is missing.
pub fn parse_registration_line(line: &str) -> Option<BitstreamDeclaration> {
    let description_at = line.find(&format!("\t{}", DESCRIPTION_MARKER));
    let head = match description_at {
        Some(i) => &line[..i],
        None => line,
    };

    let mut store_number = None;
    let mut path = None;
    let mut bundle = None;
    let mut primary = false;

    let mut tokens = head.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "-r" => {}
            "-s" => store_number = tokens.next().and_then(|s| s.parse::<i32>().ok()),
            "-f" => path = tokens.next().map(str::to_string),
            PRIMARY_MARKER => primary = true,
            t if t.starts_with(BUNDLE_MARKER) => {
                bundle = Some(t[BUNDLE_MARKER.len()..].to_string()).filter(|b| !b.is_empty())
            }
            _ => {}
        }
    }

    let store_number = store_number?;
    let path = path?;
    let bundle = bundle.unwrap_or_else(|| {
        if path.ends_with(LICENSE_FILE) {
            LICENSE_BUNDLE.to_string()
        } else {
            ORIGINAL_BUNDLE.to_string()
        }
    });

    Some(BitstreamDeclaration {
        source: BitstreamSource::Registered { store_number, path },
        bundle,
        description: marker_value(line, DESCRIPTION_MARKER)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        primary,
        permission: None,
        iiif: IiifOptions::default(),
    })
}

fn default_inline_bundle(file: &str) -> &'static str {
    if file == LICENSE_FILE {
        LICENSE_BUNDLE
    } else {
        ORIGINAL_BUNDLE
    }
}

/// Value of `\t<marker>` up to the next TAB, trimmed
///
/// A marker at the very start of the line belongs to no file and is ignored.
fn marker_value<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let needle = format!("\t{}", marker);
    let start = line.find(&needle)?;
    if start == 0 {
        return None;
    }
    let rest = &line[start + needle.len()..];
    let end = rest.find('\t').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Parse `-r 'Group Name'` / `-w Group`
fn parse_permission(value: &str) -> PermissionOverride {
    let dash = value.find('-');
    let action = dash
        .and_then(|i| value[i + 1..].chars().next())
        .and_then(|c| match c {
            'r' => Some(Action::Read),
            'w' => Some(Action::Write),
            _ => None,
        });

    let from = dash.unwrap_or(0);
    let tail = &value[from..];
    let group = if let Some(open) = tail.find('\'') {
        let inner = &tail[open + 1..];
        let close = inner.find('\'').unwrap_or(inner.len());
        &inner[..close]
    } else if let Some(space) = tail.find(' ') {
        &tail[space + 1..]
    } else {
        ""
    };

    PermissionOverride {
        action,
        group: group.trim().to_string(),
    }
}

/// Render one declaration as a `contents` line
pub fn format_declaration(declaration: &BitstreamDeclaration) -> String {
    let mut line = match &declaration.source {
        BitstreamSource::Inline { path } => path.clone(),
        BitstreamSource::Registered { store_number, path } => {
            format!("-r -s {} -f {}", store_number, path)
        }
    };

    let _ = write!(line, "\t{}{}", BUNDLE_MARKER, declaration.bundle);
    if declaration.primary {
        let _ = write!(line, "\t{}", PRIMARY_MARKER);
    }
    if let Some(description) = declaration.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = write!(line, "\t{}{}", DESCRIPTION_MARKER, description);
    }

    if matches!(declaration.source, BitstreamSource::Inline { .. }) {
        let iiif = &declaration.iiif;
        for (marker, value) in [
            (IIIF_LABEL_MARKER, &iiif.label),
            (IIIF_HEIGHT_MARKER, &iiif.height),
            (IIIF_WIDTH_MARKER, &iiif.width),
            (IIIF_TOC_MARKER, &iiif.toc),
        ] {
            if let Some(value) = value {
                let _ = write!(line, "\t{}{}", marker, value);
            }
        }
    }

    line
}

/// Write `contents` into an item folder, replacing any existing file
pub fn write_contents(item_dir: &Path, declarations: &[BitstreamDeclaration]) -> IngestResult<PathBuf> {
    let mut out = String::new();
    for declaration in declarations {
        out.push_str(&format_declaration(declaration));
        out.push('\n');
    }
    let path = item_dir.join(CONTENTS_FILE);
    std::fs::write(&path, out)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Declaration lines
    // =========================================================================

    #[test]
    fn test_declaration_with_all_markers() {
        let decl = parse_declaration_line("a.pdf\tbundle:TEXT\tprimary:true\tdescription:hi");

        assert_eq!(decl.source, BitstreamSource::Inline { path: "a.pdf".into() });
        assert_eq!(decl.bundle, "TEXT");
        assert!(decl.primary);
        assert_eq!(decl.description.as_deref(), Some("hi"));
        assert!(decl.permission.is_none());
    }

    #[test]
    fn test_markers_in_any_order() {
        let decl = parse_declaration_line("a.pdf\tdescription:Cover page\tbundle:THUMBS");
        assert_eq!(decl.bundle, "THUMBS");
        assert_eq!(decl.description.as_deref(), Some("Cover page"));
        assert!(!decl.primary);
    }

    #[test]
    fn test_bare_filename_defaults_to_original() {
        let decl = parse_declaration_line("scan_001.tif");
        assert_eq!(decl.name(), "scan_001.tif");
        assert_eq!(decl.bundle, ORIGINAL_BUNDLE);
        assert!(!decl.has_options());
    }

    #[test]
    fn test_license_defaults_to_license_bundle() {
        assert_eq!(parse_declaration_line("license.txt").bundle, LICENSE_BUNDLE);
        // Only the exact name counts for inline files
        assert_eq!(parse_declaration_line("my_license.txt").bundle, ORIGINAL_BUNDLE);
    }

    #[test]
    fn test_iiif_markers() {
        let decl = parse_declaration_line(
            "p1.jp2\tiiif-label:Page 1\tiiif-width:2000\tiiif-height:3000\tiiif-toc:Chapter 1",
        );
        assert_eq!(decl.iiif.label.as_deref(), Some("Page 1"));
        assert_eq!(decl.iiif.width.as_deref(), Some("2000"));
        assert_eq!(decl.iiif.height.as_deref(), Some("3000"));
        assert_eq!(decl.iiif.toc.as_deref(), Some("Chapter 1"));
        assert!(decl.has_options());
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    #[test]
    fn test_permission_quoted_group() {
        let decl = parse_declaration_line("a.pdf\tpermissions:-r 'Library Staff'");
        assert_eq!(
            decl.permission,
            Some(PermissionOverride {
                action: Some(Action::Read),
                group: "Library Staff".into()
            })
        );
    }

    #[test]
    fn test_permission_unquoted_group() {
        let decl = parse_declaration_line("a.pdf\tpermissions:-w Editors\tbundle:ORIGINAL");
        assert_eq!(
            decl.permission,
            Some(PermissionOverride {
                action: Some(Action::Write),
                group: "Editors".into()
            })
        );
    }

    #[test]
    fn test_permission_invalid_flag_kept_for_warning() {
        let decl = parse_declaration_line("a.pdf\tpermissions:-x Editors");
        let permission = decl.permission.unwrap();
        assert_eq!(permission.action, None);
        assert_eq!(permission.group, "Editors");
    }

    // =========================================================================
    // Registration lines
    // =========================================================================

    #[test]
    fn test_registration_line() {
        let decl = parse_registration_line("-r -s 2 -f /store/2/a.pdf\tbundle:ORIGINAL").unwrap();

        assert_eq!(
            decl.source,
            BitstreamSource::Registered {
                store_number: 2,
                path: "/store/2/a.pdf".into()
            }
        );
        assert_eq!(decl.bundle, "ORIGINAL");
        assert_eq!(decl.name(), "a.pdf");
    }

    #[test]
    fn test_registration_line_description_and_license_default() {
        let decl = parse_registration_line(
            "-r -s 1 -f batch/item_1/license.txt\tdescription:Deposit license",
        )
        .unwrap();
        assert_eq!(decl.bundle, LICENSE_BUNDLE);
        assert_eq!(decl.description.as_deref(), Some("Deposit license"));
    }

    #[test]
    fn test_registration_line_missing_store_is_rejected() {
        assert!(parse_registration_line("-r -f a.pdf").is_none());
        assert!(parse_registration_line("-r -s two -f a.pdf").is_none());
        assert!(parse_registration_line("-r -s 2").is_none());
    }

    // =========================================================================
    // Files
    // =========================================================================

    #[test]
    fn test_parse_contents_skips_blank_and_bad_registration_lines() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(
            dir.path().join(CONTENTS_FILE),
            "a.pdf\tbundle:ORIGINAL\n\n-r -s x -f b.pdf\n-r -s 1 -f store/c.pdf\n",
        )
        .unwrap();

        let decls = parse_contents(dir.path()).unwrap();

        assert_eq!(decls.len(), 2);
        assert_eq!(decls[1].name(), "c.pdf");
    }

    #[test]
    fn test_parse_contents_missing_inline_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONTENTS_FILE), "ghost.pdf\n").unwrap();

        let err = parse_contents(dir.path()).unwrap_err();
        assert!(matches!(err, IngestError::ManifestFormat { .. }));
    }

    #[test]
    fn test_parse_contents_rejects_paths_outside_folder() {
        let root = TempDir::new().unwrap();
        let item = root.path().join("item_1");
        std::fs::create_dir(&item).unwrap();
        std::fs::write(root.path().join("secret.txt"), b"not yours").unwrap();

        for line in ["../secret.txt", "./../secret.txt", "sub/../../secret.txt"] {
            std::fs::write(item.join(CONTENTS_FILE), format!("{}\n", line)).unwrap();
            let err = parse_contents(&item).unwrap_err();
            assert!(
                matches!(&err, IngestError::ManifestFormat { reason, .. } if reason.contains("not inside")),
                "{:?} accepted: {:?}",
                line,
                err
            );
        }

        let absolute = root.path().join("secret.txt");
        std::fs::write(item.join(CONTENTS_FILE), format!("{}\n", absolute.display())).unwrap();
        assert!(matches!(
            parse_contents(&item),
            Err(IngestError::ManifestFormat { .. })
        ));
    }

    #[test]
    fn test_parse_contents_accepts_subfolder_path() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img").join("p1.jp2"), b"jp2").unwrap();
        std::fs::write(dir.path().join(CONTENTS_FILE), "img/p1.jp2\tbundle:ORIGINAL\n").unwrap();

        let declarations = parse_contents(dir.path()).unwrap();
        assert_eq!(declarations[0].name(), "img/p1.jp2");
    }

    #[test]
    fn test_absent_contents_metadata_only_folder() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("dublin_core.xml"), "<dublin_core/>").unwrap();
        std::fs::write(dir.path().join("metadata_dcterms.xml"), "<dublin_core/>").unwrap();
        std::fs::write(dir.path().join("handle"), "123/4\n").unwrap();

        assert!(parse_contents(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_absent_contents_with_stray_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("dublin_core.xml"), "<dublin_core/>").unwrap();
        std::fs::write(dir.path().join("thesis.pdf"), b"%PDF").unwrap();

        let err = parse_contents(dir.path()).unwrap_err();
        assert!(matches!(err, IngestError::MissingContents(_)));
    }

    #[test]
    fn test_format_declaration_reparses() {
        let line = "a.pdf\tbundle:TEXT\tprimary:true\tdescription:hi\tiiif-label:Front";
        let decl = parse_declaration_line(line);
        assert_eq!(format_declaration(&decl), line);

        let registered = parse_registration_line("-r -s 2 -f /store/2/a.pdf\tbundle:ORIGINAL\tprimary:true").unwrap();
        let rendered = format_declaration(&registered);
        assert_eq!(rendered, "-r -s 2 -f /store/2/a.pdf\tbundle:ORIGINAL\tprimary:true");
        assert_eq!(parse_registration_line(&rendered), Some(registered));
    }
}
