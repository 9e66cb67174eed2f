//! Parsing and patching of the Android binary XML (AXML) manifest format.
//! Used to force `android:debuggable="true"` onto the `<application>` element
//! of an APK manifest.

mod chunks;
mod element;
mod patch;
mod resource_map;
mod string_pool;

#[cfg(test)]
pub(crate) mod fixtures;

pub use patch::{patch_manifest, patch_manifest_bytes, patch_manifest_file};

/// Namespace URI that `android:` prefixed attributes resolve to.
pub const ANDROID_NS_URI: &str = "http://schemas.android.com/apk/res/android";

/// Well-known resource ID of the `android:debuggable` attribute.
pub const DEBUGGABLE_RES_ID: u32 = 0x0101000F;

pub(crate) const DEBUGGABLE_STRING: &str = "debuggable";
pub(crate) const APPLICATION_STRING: &str = "application";

/// Bit within the string pool flags selecting UTF-8 encoded strings.
pub(crate) const UTF8_FLAG: u32 = 0x00000100;

/// A string reference that points at no string at all.
pub(crate) const NO_STRING: u32 = 0xFFFFFFFF;

/// `dataType` of a boolean typed value.
pub(crate) const TYPE_BOOLEAN: u8 = 0x12;
/// `dataType` of a typed value whose data word is a string reference.
pub(crate) const TYPE_STRING: u8 = 0x03;

/// The typed-value data word meaning `true`.
pub(crate) const TRUE_DATA: u32 = 0xFFFFFFFF;
