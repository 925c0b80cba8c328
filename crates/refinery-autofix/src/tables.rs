//! Fixed lookup tables for the inference pass.

/// Map a header or library base name to (apt, dnf) dev packages. Unknown
/// names fall back to the `lib<base>-dev` / `<base>-devel` convention.
pub(crate) fn header_packages(base: &str) -> (String, String) {
    let base = base.to_lowercase();
    let known: Option<(&str, &str)> = match base.as_str() {
        "z" | "zlib" => Some(("zlib1g-dev", "zlib-devel")),
        "ssl" | "openssl" | "crypto" => Some(("libssl-dev", "openssl-devel")),
        "ffi" => Some(("libffi-dev", "libffi-devel")),
        "bz2" | "bzlib" => Some(("libbz2-dev", "bzip2-devel")),
        "lzma" | "xz" => Some(("liblzma-dev", "xz-devel")),
        "png" => Some(("libpng-dev", "libpng-devel")),
        "jpeg" | "jpeglib" => Some(("libjpeg-dev", "libjpeg-turbo-devel")),
        "xml2" | "libxml" => Some(("libxml2-dev", "libxml2-devel")),
        "xslt" => Some(("libxslt1-dev", "libxslt-devel")),
        "sqlite" | "sqlite3" => Some(("libsqlite3-dev", "sqlite-devel")),
        _ => None,
    };
    match known {
        Some((apt, dnf)) => (apt.to_string(), dnf.to_string()),
        None => {
            let stripped = base.strip_prefix("lib").unwrap_or(&base);
            (format!("lib{stripped}-dev"), format!("{stripped}-devel"))
        }
    }
}

/// Map a missing command to (apt, dnf) packages. Tools outside this list are
/// ignored rather than guessed.
pub(crate) fn tool_packages(tool: &str) -> Option<(&'static str, &'static str)> {
    match tool {
        "cmake" => Some(("cmake", "cmake")),
        "ninja" => Some(("ninja-build", "ninja-build")),
        "pkg-config" => Some(("pkg-config", "pkgconf-pkg-config")),
        "cargo" => Some(("cargo", "cargo")),
        "rust" | "rustc" => Some(("rustc", "rust")),
        "make" => Some(("make", "make")),
        "gcc" => Some(("gcc", "gcc")),
        "g++" => Some(("g++", "gcc-c++")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_and_fallback() {
        assert_eq!(header_packages("zlib").0, "zlib1g-dev");
        assert_eq!(header_packages("SSL").1, "openssl-devel");
        assert_eq!(
            header_packages("libfoo"),
            ("libfoo-dev".to_string(), "foo-devel".to_string())
        );
    }

    #[test]
    fn tool_allowlist() {
        assert_eq!(tool_packages("g++"), Some(("g++", "gcc-c++")));
        assert_eq!(tool_packages("rust"), Some(("rustc", "rust")));
        assert_eq!(tool_packages("vim"), None);
    }
}
