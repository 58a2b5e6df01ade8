/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Top-level rendering: options, per-render session state, and the
//! [`render`] family of entry points.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::compiler::compile_template;
use crate::env::Environment;
use crate::error::{ErrorKind, TemplateError, TemplateResult};
use crate::format::{DEFAULT_FMT, validate_default};
use crate::interp::Machine;
use crate::lang::ast::Program;
use crate::preparse::NameFixups;
use crate::resolver::{FileSystemResolver, IncludeResolver, search_dirs};
use crate::syntax::Syntax;
use crate::value::Value;

/// Default limit on nested `include`/`rebase` calls.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 50;

/// Name used in error locations for templates given as literal text.
pub const STRING_SOURCE: &str = "<string>";

/// Options for a render.
#[derive(Clone)]
pub struct RenderOptions {
    pub syntax: Syntax,
    /// Default numeric format, `%` or `{}` style.
    pub fmt: String,
    /// Directories searched for includes after the including template's own.
    pub search_dirs: Vec<PathBuf>,
    pub max_include_depth: usize,
    pub resolver: Rc<dyn IncludeResolver>,
    /// Renames known before rendering starts, such as parameter-file names.
    pub name_fixups: NameFixups,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            syntax: Syntax::default(),
            fmt: DEFAULT_FMT.to_string(),
            search_dirs: std::env::current_dir().into_iter().collect(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            resolver: Rc::new(FileSystemResolver),
            name_fixups: NameFixups::new(),
        }
    }
}

impl fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOptions")
            .field("syntax", &self.syntax)
            .field("fmt", &self.fmt)
            .field("search_dirs", &self.search_dirs)
            .field("max_include_depth", &self.max_include_depth)
            .field("name_fixups", &self.name_fixups)
            .finish_non_exhaustive()
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_fmt(mut self, fmt: impl Into<String>) -> Self {
        self.fmt = fmt.into();
        self
    }

    /// Replace the include search directories.
    pub fn with_search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_dirs = dirs.into_iter().collect();
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Seed the renames inline spans are rewritten with.
    pub fn with_name_fixups(mut self, fixups: NameFixups) -> Self {
        self.name_fixups = fixups;
        self
    }

    pub fn with_resolver(mut self, resolver: impl IncludeResolver + 'static) -> Self {
        self.resolver = Rc::new(resolver);
        self
    }
}

/// State shared by a template and everything it includes during one render.
pub struct Session {
    options: RenderOptions,
    fmt: String,
    fixups: NameFixups,
    cache: HashMap<PathBuf, Rc<Program>>,
    depth: usize,
}

impl Session {
    /// Validate the options and start a session.
    pub fn new(options: RenderOptions) -> TemplateResult<Self> {
        options.syntax.validate()?;
        validate_default(&options.fmt)
            .map_err(|err| TemplateError::configuration(err.message()))?;
        Ok(Self {
            fmt: options.fmt.clone(),
            fixups: options.name_fixups.clone(),
            options,
            cache: HashMap::new(),
            depth: 0,
        })
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Current default numeric format.
    pub fn fmt(&self) -> &str {
        &self.fmt
    }

    pub(crate) fn set_fmt(&mut self, fmt: String) {
        debug!(fmt = %fmt, "default numeric format changed");
        self.fmt = fmt;
    }

    /// Preparse and compile a template. Variable-name fixups are shared by
    /// every template compiled in this session.
    pub fn compile(&mut self, text: &str, name: &str) -> TemplateResult<Program> {
        let program = compile_template(text, &self.options.syntax, &mut self.fixups, name)?;
        trace!(template = name, program = %program, "compiled program");
        Ok(program)
    }

    /// Execute `program` against `env`, applying any `rebase` it requests.
    /// `dir` is the directory includes are resolved from first.
    pub fn run(
        &mut self,
        program: &Program,
        env: &mut Environment,
        dir: Option<&Path>,
    ) -> TemplateResult<String> {
        let (output, rebase) = Machine::new(self, env, &program.name, dir).run(&program.body)?;
        let Some((name, overrides)) = rebase else {
            return Ok(output);
        };
        let (base, path) = self.load_include(&name, dir)?;
        for (key, value) in overrides {
            env.set(key, value);
        }
        env.set_mutable("base", Value::Str(output));
        self.enter(&name)?;
        let result = self.run(&base, env, path.parent());
        self.depth -= 1;
        result
    }

    /// Run an included template against the same environment.
    pub(crate) fn include(
        &mut self,
        name: &str,
        env: &mut Environment,
        from_dir: Option<&Path>,
    ) -> TemplateResult<String> {
        let (program, path) = self.load_include(name, from_dir)?;
        self.enter(name)?;
        let result = self.run(&program, env, path.parent());
        self.depth -= 1;
        result
    }

    fn enter(&mut self, name: &str) -> TemplateResult<()> {
        if self.depth >= self.options.max_include_depth {
            return Err(TemplateError::runtime(
                ErrorKind::RecursionError,
                format!(
                    "maximum include depth ({}) exceeded including '{name}'",
                    self.options.max_include_depth
                ),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Resolve, then compile or fetch from the per-render cache.
    fn load_include(
        &mut self,
        name: &str,
        from_dir: Option<&Path>,
    ) -> TemplateResult<(Rc<Program>, PathBuf)> {
        let dirs = search_dirs(from_dir, &self.options.search_dirs);
        let loaded = self.options.resolver.load(name, &dirs)?.ok_or_else(|| {
            TemplateError::runtime(
                ErrorKind::FileNotFoundError,
                format!("No such file or directory: '{name}'"),
            )
        })?;
        if let Some(program) = self.cache.get(&loaded.path) {
            debug!(path = %loaded.path.display(), "include cache hit");
            return Ok((Rc::clone(program), loaded.path));
        }
        debug!(path = %loaded.path.display(), "compiling include");
        let program = Rc::new(self.compile(&loaded.source, &loaded.path.display().to_string())?);
        self.cache.insert(loaded.path.clone(), Rc::clone(&program));
        Ok((program, loaded.path))
    }
}

/// Render a template given either as a path to an existing file or as
/// literal text.
///
/// `initial` supplies starting bindings; its locks carry over. Returns the
/// output and the final environment.
pub fn render(
    source: &str,
    initial: &Environment,
    options: &RenderOptions,
) -> TemplateResult<(String, Environment)> {
    let path = Path::new(source);
    if !source.contains('\n') && path.is_file() {
        render_file(path, initial, options)
    } else {
        render_str(source, initial, options)
    }
}

/// Render literal template text.
pub fn render_str(
    text: &str,
    initial: &Environment,
    options: &RenderOptions,
) -> TemplateResult<(String, Environment)> {
    render_named(text, STRING_SOURCE, None, initial, options)
}

/// Render the template stored at `path`.
pub fn render_file(
    path: &Path,
    initial: &Environment,
    options: &RenderOptions,
) -> TemplateResult<(String, Environment)> {
    let text = std::fs::read_to_string(path)?;
    render_named(&text, &path.display().to_string(), path.parent(), initial, options)
}

fn render_named(
    text: &str,
    name: &str,
    dir: Option<&Path>,
    initial: &Environment,
    options: &RenderOptions,
) -> TemplateResult<(String, Environment)> {
    let mut session = Session::new(options.clone())?;
    let program = session.compile(text, name)?;
    let mut env = Environment::with_builtins();
    env.merge(initial);
    let output = session.run(&program, &mut env, dir)?;
    Ok((output, env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryResolver;
    use pretty_assertions::assert_eq;

    fn memory(templates: &[(&str, &str)]) -> RenderOptions {
        RenderOptions::new()
            .with_search_dirs(Vec::new())
            .with_resolver(MemoryResolver::with_templates(templates.iter().copied()))
    }

    #[test]
    fn test_render_literal() {
        let (out, env) = render_str("x = {x = 2 + 3}\n", &Environment::new(), &memory(&[])).unwrap();
        assert_eq!(out, "x = 5\n");
        assert!(env.get("x").unwrap().py_eq(&Value::Int(5)));
    }

    #[test]
    fn test_include_shares_environment() {
        let options = memory(&[("inc.inp", "% y = Immutable(10)\ninside {x}\n")]);
        let source = "% x = 1\n% include('inc.inp')\n% y = 3\ny = {y}\n";
        let (out, _) = render_str(source, &Environment::new(), &options).unwrap();
        assert_eq!(out, "inside 1\ny = 10\n");
    }

    #[test]
    fn test_parameter_renames_reach_templates() {
        let params = crate::params::parse_params("1 functions\n1 ASV_1:response_fn_1\n").unwrap();
        let mut env = Environment::new();
        crate::params::bind_immutable(&mut env, params.entries);
        let options = memory(&[("inc.inp", "{ASV_1:response_fn_1 + 1}")])
            .with_name_fixups(params.fixups);
        let source = "{ASV_1:response_fn_1} {'ASV_1:response_fn_1'}\n{include('inc.inp')}\n";
        let (out, _) = render_str(source, &env, &options).unwrap();
        assert_eq!(out, "1 ASV_1:response_fn_1\n2\n");
    }

    #[test]
    fn test_missing_include() {
        let err = render_str("{include('nope.inp')}", &Environment::new(), &memory(&[])).unwrap_err();
        assert_eq!(err.class_name(), "FileNotFoundError");
    }

    #[test]
    fn test_recursive_include_is_bounded() {
        let options = memory(&[("loop.inp", "{include('loop.inp')}")]).with_max_include_depth(5);
        let err = render_str("{include('loop.inp')}", &Environment::new(), &options).unwrap_err();
        assert_eq!(err.class_name(), "RecursionError");
    }

    #[test]
    fn test_rebase_binds_base() {
        let options = memory(&[("frame.inp", "<<{!base}>> {title}\n")]);
        let source = "% rebase('frame.inp', title='T')\nbody\n";
        let (out, _) = render_str(source, &Environment::new(), &options).unwrap();
        assert_eq!(out, "<<body\n>> T\n");
    }

    #[test]
    fn test_setfmt_is_per_render() {
        let options = memory(&[]);
        let (out, _) = render_str("% setfmt('%0.2f')\n{pi}\n", &Environment::new(), &options).unwrap();
        assert_eq!(out, "3.14\n");
        let (out, _) = render_str("{pi}\n", &Environment::new(), &options).unwrap();
        assert_eq!(out, "3.141592654\n");
    }

    #[test]
    fn test_invalid_fmt_is_configuration_error() {
        let options = memory(&[]).with_fmt("plain");
        let err = render_str("x", &Environment::new(), &options).unwrap_err();
        assert_eq!(err.class_name(), "ConfigurationError");
    }
}
