//! Image name lookup from a command line.

const DEFAULT_EXTENSION: &str = ".exe";

fn has_extension(name: &str) -> bool {
    let file = name.rsplit(['\\', '/']).next().unwrap_or(name);
    file.contains('.')
}

fn push_candidate(candidates: &mut Vec<String>, name: &str) {
    if name.is_empty() {
        return;
    }
    candidates.push(name.to_owned());
    if !has_extension(name) {
        candidates.push(format!("{name}{DEFAULT_EXTENSION}"));
    }
}

/// Image names to try for `command_line`, in lookup order.
///
/// A double-quoted first token is the only candidate. Otherwise every prefix
/// ending before a space is tried, shortest first, followed by the whole
/// line. A name without an extension is also tried with `.exe` appended.
pub(crate) fn image_candidates(command_line: &str) -> Vec<String> {
    let line = command_line.trim_start();
    let mut candidates = Vec::new();

    if let Some(quoted) = line.strip_prefix('"') {
        let name = quoted.split('"').next().unwrap_or(quoted);
        push_candidate(&mut candidates, name);
        return candidates;
    }

    let line = line.trim_end();
    for (end, _) in line.match_indices(' ') {
        let prefix = &line[..end];
        if !prefix.ends_with(' ') {
            push_candidate(&mut candidates, prefix);
        }
    }
    push_candidate(&mut candidates, line);
    candidates
}
