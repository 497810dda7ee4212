/// Strips any `@digest` and `:tag` suffix from an image reference, leaving
/// the repository. A `:` that belongs to a registry port is kept.
///
///```
/// use container_autoupdate::repository_of;
///
/// assert_eq!(repository_of("myapp:latest"), "myapp");
/// assert_eq!(repository_of("myapp"), "myapp");
/// assert_eq!(
///     repository_of("registry.local:5000/team/app:1.2"),
///     "registry.local:5000/team/app"
/// );
/// assert_eq!(repository_of("registry.local:5000/app"), "registry.local:5000/app");
/// ```
pub fn repository_of(reference: &str) -> &str {
    let reference = reference
        .split_once('@')
        .map_or(reference, |(repository, _)| repository);
    match reference.rfind(':') {
        Some(i) if !reference[i..].contains('/') => &reference[..i],
        _ => reference,
    }
}

/// Joins a repository and tag into a pullable `repository:tag` reference
pub fn image_reference(repository: &str, tag: &str) -> String {
    format!("{repository}:{tag}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_digests() {
        assert_eq!(
            repository_of("ghcr.io/org/app@sha256:0123456789abcdef"),
            "ghcr.io/org/app"
        );
        assert_eq!(
            repository_of("ghcr.io/org/app:v2@sha256:0123456789abcdef"),
            "ghcr.io/org/app"
        );
    }

    #[test]
    fn tag_characters_are_kept_verbatim() {
        assert_eq!(repository_of("nginx:1.25-alpine"), "nginx");
        assert_eq!(repository_of("library/nginx:stable"), "library/nginx");
        assert_eq!(repository_of("localhost:5000/nginx"), "localhost:5000/nginx");
    }

    #[test]
    fn references() {
        assert_eq!(image_reference("myapp", "latest"), "myapp:latest");
        assert_eq!(
            image_reference(repository_of("localhost:5000/web:old"), "new"),
            "localhost:5000/web:new"
        );
    }
}
