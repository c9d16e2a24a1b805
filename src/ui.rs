pub fn info(message: &str) {
    println!("{message}");
}

pub fn warn(message: &str) {
    eprintln!("warning: {message}");
}

pub fn error(message: &str) {
    eprintln!("error: {message}");
}

pub fn blank_line() {
    println!();
}

pub fn artifact_published(path: &str, size: &str) {
    println!("  {path} ({size})");
}

pub fn publish_summary(action: &str, completed: usize, total: usize, prefix: &str) {
    blank_line();
    if total == 0 {
        println!("Summary: no artifacts processed under '{}'", prefix);
        return;
    }

    if completed == total {
        println!(
            "Summary: {} {} artifact{} under '{}'",
            capitalize(action),
            completed,
            if completed == 1 { "" } else { "s" },
            prefix
        );
    } else {
        println!(
            "Summary: {} {}/{} artifact{} under '{}'",
            capitalize(action),
            completed,
            total,
            if total == 1 { "" } else { "s" },
            prefix
        );
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
