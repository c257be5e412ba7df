#[cfg(test)]
mod interpreter_tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use rox::ast::Stmt;
    use rox::error::{Diagnostics, LoxError};
    use rox::interpreter::Interpreter;
    use rox::session::{self, RunError, Session, EXIT_RUNTIME, EXIT_STATIC};
    use rox::value::Value;

    /// In-memory `print` sink shared between the test and the interpreter.
    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }

        fn clear(&self) {
            self.0.borrow_mut().clear();
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session() -> (Session, SharedBuf) {
        let out = SharedBuf::default();
        (Session::with_output(Box::new(out.clone())), out)
    }

    fn run(source: &str) -> (String, Result<(), RunError>) {
        let (mut session, out) = session();
        let result = session.run(source);
        (out.contents(), result)
    }

    fn output(source: &str) -> String {
        let (out, result) = run(source);
        if let Err(err) = result {
            panic!("program failed: {}\noutput so far:\n{}", err, out);
        }
        out
    }

    /// Output produced before the failure, and the rendered runtime error.
    fn runtime_error(source: &str) -> (String, String) {
        match run(source) {
            (out, Err(err @ RunError::Runtime(_))) => {
                assert_eq!(err.exit_code(), EXIT_RUNTIME);
                (out, err.to_string())
            }
            (out, other) => panic!("expected runtime error, got {:?} (output {:?})", other, out),
        }
    }

    #[test]
    fn test_arithmetic_and_display() {
        assert_eq!(
            output("print 1 + 2 * 3; print 1 / 2; print 10 / 2; print 7 + 0.25; print -(3);"),
            "7\n0.5\n5\n7.25\n-3\n"
        );
        assert_eq!(output("print \"con\" + \"cat\";"), "concat\n");
        assert_eq!(output("print nil; print true; print !true;"), "nil\ntrue\nfalse\n");
    }

    #[test]
    fn test_division_by_zero_is_not_an_error() {
        assert_eq!(output("print 1 / 0 > 1000000;"), "true\n");
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(
            output(
                "if (0) print \"zero\"; if (\"\") print \"empty\"; \
                 if (nil) print \"no\"; else print \"nil\"; \
                 if (false) print \"no\"; else print \"false\";"
            ),
            "zero\nempty\nnil\nfalse\n"
        );
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(
            output("print nil or \"x\"; print 1 and 2; print false and undefined;"),
            "x\n2\nfalse\n"
        );
    }

    #[test]
    fn test_equality_is_numeric_only() {
        assert_eq!(output("print 1 == 1; print 1 != 2; print 3 == 4;"), "true\ntrue\nfalse\n");

        let (_, err) = runtime_error("print \"a\" == \"a\";");
        assert_eq!(
            err,
            "Operands must be numbers for '==' (got string and string).\n[line 1]"
        );

        let (_, err) = runtime_error("print nil != 1;");
        assert_eq!(
            err,
            "Operands must be numbers for '!=' (got nil and number).\n[line 1]"
        );
    }

    #[test]
    fn test_operand_type_errors() {
        let (_, err) = runtime_error("print 1 + \"a\";");
        assert_eq!(
            err,
            "Operands must be two numbers or two strings for '+' (got number and string).\n[line 1]"
        );

        let (_, err) = runtime_error("print -\"x\";");
        assert_eq!(err, "Operand must be a number for '-' (got string).\n[line 1]");

        let (_, err) = runtime_error("print \"a\" < 1;");
        assert_eq!(
            err,
            "Operands must be numbers for '<' (got string and number).\n[line 1]"
        );
    }

    #[test]
    fn test_block_scoping_and_shadowing() {
        assert_eq!(
            output("var a = 1; { var a = 2; { a = 3; print a; } print a; } print a;"),
            "3\n3\n1\n"
        );
    }

    #[test]
    fn test_closure_binds_at_declaration() {
        assert_eq!(
            output(
                "var a = \"global\";
                 {
                   fun showA() { print a; }
                   showA();
                   var a = \"block\";
                   showA();
                 }"
            ),
            "global\nglobal\n"
        );
    }

    #[test]
    fn test_counters_keep_independent_state() {
        assert_eq!(
            output(
                "fun makeCounter() {
                   var i = 0;
                   fun count() { i = i + 1; print i; }
                   return count;
                 }
                 var c1 = makeCounter();
                 c1();
                 c1();
                 var c2 = makeCounter();
                 c2();"
            ),
            "1\n2\n1\n"
        );
    }

    #[test]
    fn test_recursion_and_mutual_recursion() {
        assert_eq!(
            output(
                "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
                 print fib(15);"
            ),
            "610\n"
        );

        assert_eq!(
            output(
                "fun isEven(n) { if (n == 0) return true; return isOdd(n - 1); }
                 fun isOdd(n) { if (n == 0) return false; return isEven(n - 1); }
                 print isEven(10);
                 print isOdd(7);"
            ),
            "true\ntrue\n"
        );
    }

    #[test]
    fn test_return_unwinds_loops() {
        assert_eq!(
            output(
                "fun find() {
                   for (var i = 0; i < 10; i = i + 1) {
                     var j = 0;
                     while (j < 10) {
                       if (i == 3 and j == 2) return i * 10 + j;
                       j = j + 1;
                     }
                   }
                   return -1;
                 }
                 print find();"
            ),
            "32\n"
        );
    }

    #[test]
    fn test_for_loop_runs_increment() {
        assert_eq!(
            output("var sum = 0; for (var i = 1; i <= 4; i = i + 1) sum = sum + i; print sum;"),
            "10\n"
        );
    }

    #[test]
    fn test_callable_display() {
        assert_eq!(
            output("fun f() {} print f; class K {} print K; print K(); print clock;"),
            "<fn f>\nK\nK instance\n<native fn clock>\n"
        );
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        assert_eq!(output("fun f() {} print f();"), "nil\n");
    }

    #[test]
    fn test_clock_returns_a_number() {
        assert_eq!(output("print clock() > 0; var t = clock(); print t - t;"), "true\n0\n");
    }

    #[test]
    fn test_fields_and_methods() {
        assert_eq!(
            output(
                "class A { m() { return \"method\"; } }
                 var a = A();
                 print a.m();
                 a.m = \"field\";
                 print a.m;"
            ),
            "method\nfield\n"
        );
    }

    #[test]
    fn test_bound_methods_remember_their_instance() {
        assert_eq!(
            output(
                "class Box {
                   init(v) { this.v = v; }
                   get() { return this.v; }
                 }
                 var g1 = Box(1).get;
                 var g2 = Box(2).get;
                 print g1();
                 print g2();"
            ),
            "1\n2\n"
        );
    }

    #[test]
    fn test_initializer_sets_fields_and_returns_this() {
        assert_eq!(
            output(
                "class P {
                   init(x) { this.x = x; return; this.x = -1; }
                 }
                 var p = P(3);
                 print p.x;
                 var q = p.init(4);
                 print q.x;
                 print p.x;
                 print q;"
            ),
            "3\n4\n4\nP instance\n"
        );
    }

    #[test]
    fn test_arity_is_checked_before_the_call() {
        let (out, err) = runtime_error(
            "class P { init(x) { print \"init ran\"; this.x = x; } }
             print \"before\";
             var p = P(1, 2);
             print \"after\";",
        );

        assert_eq!(out, "before\n");
        assert_eq!(err, "Expected 1 arguments but got 2.\n[line 3]");

        let (_, err) = runtime_error("fun f(a, b) {} f(1);");
        assert_eq!(err, "Expected 2 arguments but got 1.\n[line 1]");

        let (_, err) = runtime_error("class E {} E(1);");
        assert_eq!(err, "Expected 0 arguments but got 1.\n[line 1]");
    }

    #[test]
    fn test_inherited_methods_and_initializers() {
        assert_eq!(
            output(
                "class A { init(n) { this.n = n; } show() { print this.n; } }
                 class B < A {}
                 B(7).show();"
            ),
            "7\n"
        );
    }

    #[test]
    fn test_super_calls_superclass_method() {
        assert_eq!(
            output(
                "class A { method() { print \"A method\"; } }
                 class B < A {
                   method() { print \"B method\"; }
                   test() { super.method(); }
                 }
                 class C < B {}
                 C().test();"
            ),
            "A method\n"
        );
    }

    #[test]
    fn test_super_method_is_bound_to_the_receiver() {
        assert_eq!(
            output(
                "class A {
                   name() { return \"A\"; }
                   describe() { print this.name(); }
                 }
                 class B < A {
                   name() { return \"B\"; }
                   describe() { super.describe(); }
                 }
                 B().describe();"
            ),
            "B\n"
        );
    }

    #[test]
    fn test_runtime_error_stops_execution() {
        let (out, err) = runtime_error("print 1;\nprint undefinedVar;\nprint 2;");

        assert_eq!(out, "1\n");
        assert_eq!(err, "Undefined variable 'undefinedVar'.\n[line 2]");
    }

    #[test]
    fn test_object_model_errors() {
        let (_, err) = runtime_error("var NotClass = \"x\";\nclass A < NotClass {}");
        assert_eq!(err, "Superclass must be a class.\n[line 2]");

        let (_, err) = runtime_error("\"str\"();");
        assert_eq!(err, "Can only call functions and classes.\n[line 1]");

        let (_, err) = runtime_error("class A {} print A().nope;");
        assert_eq!(err, "Undefined property 'nope'.\n[line 1]");

        let (_, err) = runtime_error("var x = 1; print x.y;");
        assert_eq!(err, "Only instances have properties.\n[line 1]");

        let (_, err) = runtime_error("var x = 1; x.y = 2;");
        assert_eq!(err, "Only instances have fields.\n[line 1]");

        let (_, err) = runtime_error("undefinedVar = 1;");
        assert_eq!(err, "Undefined variable 'undefinedVar'.\n[line 1]");
    }

    #[test]
    fn test_static_errors_prevent_execution() {
        let (out, result) = run("print 1;\nprint (;");
        assert_eq!(out, "");
        let err = result.unwrap_err();
        assert!(matches!(err, RunError::Static(_)));
        assert_eq!(err.exit_code(), EXIT_STATIC);

        // Resolution errors also stop the whole program.
        let (out, result) = run("print \"x\";\nreturn 1;");
        assert_eq!(out, "");
        assert_eq!(
            result.unwrap_err().to_string(),
            "[line 2] Error: Can't return from top-level code."
        );
    }

    #[test]
    fn test_session_keeps_globals_between_runs() {
        let (mut session, out) = session();

        session.run("var a = 1;").unwrap();
        session.run("var a = a + 1; print a;").unwrap();
        session.run("fun f() { return a; }").unwrap();
        session.run("{ var local = f(); print local; }").unwrap();
        assert_eq!(out.contents(), "2\n2\n");

        // A failed run leaves earlier definitions in place.
        out.clear();
        assert!(session.run("print nope;").is_err());
        assert!(session.run("print (;").is_err());
        session.run("print a;").unwrap();
        assert_eq!(out.contents(), "2\n");
    }

    #[test]
    fn test_closures_from_earlier_runs_keep_their_locals() {
        let (mut session, out) = session();

        session
            .run("fun mk() { var n = 0; fun inc() { n = n + 1; return n; } return inc; }")
            .unwrap();
        session.run("var inc = mk();").unwrap();
        session.run("{ var n = 100; print inc(); }").unwrap();
        session.run("print inc();").unwrap();

        assert_eq!(out.contents(), "1\n2\n");
    }

    #[test]
    fn test_evaluate_single_expression() {
        let (mut session, _) = session();

        assert_eq!(session.evaluate("(1 + 2) * 3").unwrap(), Value::Number(9.0));
        assert_eq!(
            session.evaluate("\"a\" + \"b\"").unwrap(),
            Value::String("ab".to_string())
        );
        assert!(matches!(
            session.evaluate("1 +"),
            Err(RunError::Static(_))
        ));
        assert!(matches!(session.evaluate("this"), Err(RunError::Static(_))));
        assert!(matches!(session.evaluate("-nil"), Err(RunError::Runtime(_))));
    }

    #[test]
    fn test_return_escaping_to_top_level_is_internal() {
        let out = SharedBuf::default();
        let mut interpreter = Interpreter::with_output(Box::new(out.clone()));

        let result = interpreter.interpret(&[
            Stmt::Return {
                line: 1,
                value: None,
            },
        ]);

        assert!(matches!(result, Err(LoxError::Internal(_))));
        assert_eq!(out.contents(), "");
    }

    #[test]
    fn test_static_errors_are_all_reported() {
        let mut diagnostics = Diagnostics::new();
        session::parse_program("print ;\nvar = 1;", &mut diagnostics);
        assert_eq!(diagnostics.len(), 2);

        let err = Session::check("print ;\nvar = 1;").unwrap_err();
        let expected: Vec<String> = diagnostics.iter().map(|e| e.to_string()).collect();
        assert_eq!(err.to_string(), expected.join("\n"));
    }

    #[test]
    fn test_source_must_be_utf8() {
        assert_eq!(session::decode_source(b"print 1;").unwrap(), "print 1;");

        let err = session::decode_source(&[b'"', 0xff, b'"']).unwrap_err();
        assert!(matches!(err, LoxError::Utf8(_)));
    }
}
