fn main() {
    // Windows: embed icon and version resource into the executable
    #[cfg(target_os = "windows")]
    {
        let icon_path = "assets/app-icon.ico";

        let mut res = winresource::WindowsResource::new();
        res.set("FileDescription", "Bot Agent");
        res.set("ProductName", "BotAgent");
        if std::path::Path::new(icon_path).exists() {
            res.set_icon(icon_path);
        } else {
            println!("cargo:warning=Icon file not found at {}, skipping Windows icon embedding", icon_path);
        }

        if let Err(e) = res.compile() {
            eprintln!("Warning: Failed to embed Windows resources: {}", e);
        }
    }

    // Rerun if icon changes
    println!("cargo:rerun-if-changed=assets/app-icon.ico");
}
