//! Version command.

const LICENSE_NOTICE: &str = "\
Tools for a Website with Minimal Magic
Copyright 2019 Chris Wolfe

Licensed under the Apache License, Version 2.0 (the \"License\");
you may not use this work except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, work
distributed under the License is distributed on an \"AS IS\" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.";

pub fn message() -> String {
    format!(
        "{} {}\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        LICENSE_NOTICE
    )
}

/// Print version and licensing information.
pub fn run() {
    println!("{}", message());
}
