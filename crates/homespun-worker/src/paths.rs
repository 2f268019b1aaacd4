/// Map an in-container path onto the host filesystem.
///
/// With no `host_data_path` the path is already host-meaningful and passes
/// through. Otherwise a path equal to the data volume, or nested under it,
/// has the volume prefix spliced out for the host path; anything outside the
/// volume passes through untouched. String-level on purpose: container paths
/// may use either separator regardless of the host platform.
pub fn to_host_path(path: &str, data_volume_path: &str, host_data_path: Option<&str>) -> String {
    let Some(host) = host_data_path else {
        return path.to_string();
    };
    if path == data_volume_path {
        return host.to_string();
    }
    for sep in ['/', '\\'] {
        let prefix = format!("{data_volume_path}{sep}");
        if let Some(rest) = path.strip_prefix(&prefix) {
            return format!("{host}{sep}{rest}");
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_path_is_spliced_onto_host() {
        assert_eq!(to_host_path("/data/x", "/data", Some("/h/d")), "/h/d/x");
        assert_eq!(
            to_host_path("/data/a/b.txt", "/data", Some("/mnt/vol")),
            "/mnt/vol/a/b.txt"
        );
    }

    #[test]
    fn exact_volume_path_maps_to_host_root() {
        assert_eq!(to_host_path("/data", "/data", Some("/h/d")), "/h/d");
    }

    #[test]
    fn paths_outside_the_volume_pass_through() {
        assert_eq!(to_host_path("/other", "/data", Some("/h/d")), "/other");
        // A sibling sharing the prefix string is not inside the volume.
        assert_eq!(to_host_path("/database", "/data", Some("/h/d")), "/database");
    }

    #[test]
    fn no_host_mapping_passes_through() {
        assert_eq!(to_host_path("/data/x", "/data", None), "/data/x");
    }

    #[test]
    fn backslash_separators_are_honoured() {
        assert_eq!(
            to_host_path(r"C:\vol\x", r"C:\vol", Some(r"D:\host")),
            r"D:\host\x"
        );
    }
}
