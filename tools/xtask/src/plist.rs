/// Bundle metadata. One constant feeds both CFBundle version fields so the
/// bundle step stays idempotent: same inputs, byte-identical plist.
pub const APP_NAME: &str = "VoiceMorph";
pub const BUNDLE_ID: &str = "com.voicemorph.desktop";
pub const BUNDLE_VERSION: &str = "0.1.0";
pub const COPYRIGHT: &str = "Copyright © 2026 VoiceMorph. All rights reserved.";
pub const MIC_USAGE: &str =
    "VoiceMorph needs microphone access to record audio for voice conversion.";
const MIN_SYSTEM_VERSION: &str = "12.0";

pub fn render_info_plist() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CFBundleDevelopmentRegion</key>
	<string>en</string>
	<key>CFBundleExecutable</key>
	<string>{APP_NAME}</string>
	<key>CFBundleIconFile</key>
	<string>icon.icns</string>
	<key>CFBundleIdentifier</key>
	<string>{BUNDLE_ID}</string>
	<key>CFBundleInfoDictionaryVersion</key>
	<string>6.0</string>
	<key>CFBundleName</key>
	<string>{APP_NAME}</string>
	<key>CFBundlePackageType</key>
	<string>APPL</string>
	<key>CFBundleShortVersionString</key>
	<string>{BUNDLE_VERSION}</string>
	<key>CFBundleVersion</key>
	<string>{BUNDLE_VERSION}</string>
	<key>LSMinimumSystemVersion</key>
	<string>{MIN_SYSTEM_VERSION}</string>
	<key>NSHighResolutionCapable</key>
	<true/>
	<key>NSHumanReadableCopyright</key>
	<string>{COPYRIGHT}</string>
	<key>NSMicrophoneUsageDescription</key>
	<string>{MIC_USAGE}</string>
</dict>
</plist>
"#
    )
}

/// Hardened-runtime entitlements used when a signing identity is supplied.
pub fn render_entitlements() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>com.apple.security.device.audio-input</key>
	<true/>
	<key>com.apple.security.cs.allow-unsigned-executable-memory</key>
	<true/>
</dict>
</plist>
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_plist_is_idempotent() {
        assert_eq!(render_info_plist(), render_info_plist());
    }

    #[test]
    fn info_plist_declares_version_and_permissions() {
        let p = render_info_plist();
        assert!(p.contains("<key>CFBundleShortVersionString</key>"));
        assert!(p.contains("<key>CFBundleVersion</key>"));
        assert_eq!(p.matches(BUNDLE_VERSION).count(), 2);
        assert!(p.contains("<key>NSMicrophoneUsageDescription</key>"));
        assert!(p.contains(BUNDLE_ID));
    }

    #[test]
    fn entitlements_cover_audio_input() {
        let e = render_entitlements();
        assert!(e.contains("com.apple.security.device.audio-input"));
    }
}
