//! Declarative macros for manifest definitions
//!
//! These macros keep stage definitions close to the Dockerfile they
//! describe while still producing typed [`Instruction`](crate::manifest::Instruction)
//! values.

/// Creates a `RUN` instruction
#[macro_export]
macro_rules! run {
    ($cmd:expr) => {
        $crate::manifest::Instruction::run($cmd)
    };
}

/// Creates a `COPY` from the build context or, with `from = ...`, from an earlier stage
#[macro_export]
macro_rules! copy {
    (from = $stage:expr, [$($src:expr),+ $(,)?] => $dest:expr) => {
        $crate::manifest::Instruction::copy_from($stage, [$($src),+], $dest)
    };
    (from = $stage:expr, chown = $owner:expr, [$($src:expr),+ $(,)?] => $dest:expr) => {
        $crate::manifest::Instruction::copy_from($stage, [$($src),+], $dest).with_chown($owner)
    };
    ([$($src:expr),+ $(,)?] => $dest:expr) => {
        $crate::manifest::Instruction::copy([$($src),+], $dest)
    };
}

/// Creates one `ENV` instruction per `KEY = value` pair
#[macro_export]
macro_rules! set_env {
    ( $( $key:ident = $value:expr ),* $(,)? ) => {
        vec![ $( $crate::manifest::Instruction::env(stringify!($key), $value) ),* ]
    };
}

/// Creates an exec-form command
#[macro_export]
macro_rules! exec {
    ( $( $arg:expr ),+ $(,)? ) => {
        $crate::manifest::CommandForm::exec([$($arg),+])
    };
}

/// Creates a list of instructions; `..vec` splices a `Vec<Instruction>`
#[macro_export]
macro_rules! instructions {
    (@acc $v:ident;) => {};
    (@acc $v:ident; .. $many:expr $(, $($rest:tt)*)?) => {
        $v.extend($many);
        $crate::instructions!(@acc $v; $($($rest)*)?);
    };
    (@acc $v:ident; $one:expr $(, $($rest:tt)*)?) => {
        $v.push($one);
        $crate::instructions!(@acc $v; $($($rest)*)?);
    };
    ( $($body:tt)* ) => {{
        #[allow(unused_mut)]
        let mut v: Vec<$crate::manifest::Instruction> = Vec::new();
        $crate::instructions!(@acc v; $($body)*);
        v
    }};
}

/// Creates a stage from an image (`image: ...`) or an earlier stage (`from: ...`)
#[macro_export]
macro_rules! stage {
    ($name:expr, image: $image:expr, $instructions:expr $(,)?) => {
        $crate::manifest::Stage::from_image($name, $image).with_instructions($instructions)
    };
    ($name:expr, from: $parent:expr, $instructions:expr $(,)?) => {
        $crate::manifest::Stage::from_stage($name, $parent).with_instructions($instructions)
    };
}

/// Creates a manifest from a list of stages without validating it
#[macro_export]
macro_rules! manifest {
    ($name:expr, [ $( $stage:expr ),* $(,)? ]) => {
        $crate::manifest::Manifest::builder()
            .name($name)
            .stages(vec![$($stage),*])
            .build_unchecked()
    };
}

#[cfg(test)]
mod tests {
    use crate::manifest::{CommandForm, CopySource, Instruction, Validate};

    #[test]
    fn test_run_macro() {
        assert_eq!(run!("npm ci"), Instruction::run("npm ci"));
    }

    #[test]
    fn test_copy_macro_forms() {
        let context = copy!(["package*.json", "tsconfig*.json"] => "./");
        assert!(matches!(context, Instruction::Copy { from: CopySource::Context, ref sources, .. } if sources.len() == 2));

        let staged = copy!(from = "dependencies", ["/app/node_modules"] => "./node_modules");
        assert_eq!(staged.copy_stage(), Some("dependencies"));

        let owned = copy!(from = "development", chown = "claude:claude", ["/app/dist"] => "./dist");
        assert!(matches!(owned, Instruction::Copy { chown: Some(ref owner), .. } if owner == "claude:claude"));
    }

    #[test]
    fn test_set_env_macro() {
        let env = set_env!(NODE_ENV = "test", CI = "true");
        assert_eq!(
            env,
            vec![Instruction::env("NODE_ENV", "test"), Instruction::env("CI", "true")]
        );
    }

    #[test]
    fn test_exec_macro() {
        assert_eq!(exec!("npm", "test"), CommandForm::exec(["npm", "test"]));
    }

    #[test]
    fn test_instructions_macro_splices() {
        let list = instructions![
            run!("mkdir -p test-results coverage"),
            ..set_env!(NODE_ENV = "test", CI = "true"),
            run!("true"),
        ];
        assert_eq!(list.len(), 4);
        assert_eq!(list[1], Instruction::env("NODE_ENV", "test"));
        assert!(instructions![].is_empty());
    }

    #[test]
    fn test_stage_and_manifest_macros() {
        let manifest = manifest!(
            "demo",
            [
                stage!("base", image: "alpine:3.20", instructions![run!("apk add --no-cache curl")]),
                stage!("app", from: "base", instructions![copy!(["."] => "/src")]),
            ]
        );
        assert_eq!(manifest.stage_count(), 2);
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.stage("app").map(|s| s.references()), Some(vec!["base"]));
    }
}
