//! Pangea compiler binary (`pangc`)

fn main() {
    let code = pangea::cli::run();
    std::process::exit(code);
}
