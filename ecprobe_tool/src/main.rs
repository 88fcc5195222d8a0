use ecprobe_lib::commandline;

fn main() {
    let args = commandline::parse();
    std::process::exit(commandline::run_with_args(&args));
}
