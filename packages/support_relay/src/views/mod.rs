mod index;

pub use index::index_page;

// Shared CSS constant
pub const CSS: &str = r#"
    .transcript {
        font-family: ui-sans-serif, system-ui, -apple-system, 'Segoe UI', sans-serif;
    }

    .msg-sys {
        color: #9ca3af;
        font-style: italic;
    }

    .msg-self {
        color: #93c5fd;
    }

    .roster-item.selected {
        background-color: #1e3a5f;
        border-color: #4299e1;
    }
"#;
